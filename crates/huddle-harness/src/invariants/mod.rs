//! Invariant checking over observed snapshots.
//!
//! Invariants are properties that must always hold during execution. Unlike
//! example-based tests that check specific scenarios, invariants verify
//! behavioral properties across every snapshot a subscriber ever saw.
//!
//! # Usage
//!
//! ```ignore
//! let log = SnapshotLog::new();
//! let _sub = driver.subscribe(&room, log.recorder())?;
//! // ... drive events ...
//! InvariantRegistry::standard().assert_all(&log, "after churn");
//! ```

mod checks;
mod log;

pub use checks::{ActiveOnly, ChatOrdering, JoinOrdering, RoomSeqMonotonic};
pub use log::SnapshotLog;

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// An invariant that can be checked against observed snapshots.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against everything observed so far.
    fn check(&self, log: &SnapshotLog) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Create a registry with the standard snapshot invariants.
    ///
    /// Includes:
    /// - [`RoomSeqMonotonic`]: room sequence strictly increases
    /// - [`ActiveOnly`]: only active participants are shown, once each
    /// - [`JoinOrdering`]: participants are ordered by join sequence
    /// - [`ChatOrdering`]: chat is ordered and never ahead of the room
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(RoomSeqMonotonic);
        registry.add(ActiveOnly);
        registry.add(JoinOrdering);
        registry.add(ChatOrdering);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, log: &SnapshotLog) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(log).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    pub fn assert_all(&self, log: &SnapshotLog, context: &str) {
        if let Err(violations) = self.check_all(log) {
            let messages: Vec<_> = violations.iter().map(|v| v.to_string()).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

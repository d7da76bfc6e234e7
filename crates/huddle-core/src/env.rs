//! Environment abstraction for deterministic testing.
//!
//! Decouples session logic from system resources (monotonic time, wall
//! clock). Enables deterministic simulation with a virtual clock and
//! production use with real system time.

use std::time::Duration;

/// Abstract environment providing monotonic and wall-clock time.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - Methods are infallible except in exceptional circumstances (e.g.
///   incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `tokio::time::Instant`, while simulation
    /// environments use a virtual instant driven by the test.
    type Instant: Copy
        + Ord
        + Send
        + Sync
        + std::fmt::Debug
        + std::ops::Add<Duration, Output = Self::Instant>
        + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - This method MUST return values that never decrease within a single
    ///   execution context. Subsequent calls must return times >= previous
    ///   calls.
    fn now(&self) -> Self::Instant;

    /// Milliseconds since the Unix epoch.
    ///
    /// Only used for human-facing timestamps (chat messages). Ordering and
    /// timeouts always use [`Environment::now`].
    fn wall_clock_millis(&self) -> u64;
}

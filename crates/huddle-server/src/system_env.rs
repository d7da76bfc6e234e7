//! Production Environment implementation using the Tokio clock.
//!
//! `SystemEnv` is the production implementation of the Environment trait.
//!
//! # Capabilities
//!
//! - Tokio's monotonic clock (`tokio::time::Instant`) that advances naturally
//! - System wall clock for chat timestamps
//!
//! Using the Tokio clock instead of `std::time::Instant` lets tests pause and
//! advance time with `tokio::time::pause()`, while production behaves like
//! the system clock.

use huddle_core::env::Environment;

/// Production environment using the Tokio clock.
///
/// Uses `tokio::time::Instant::now()` for time. Must be used from inside a
/// Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    #[allow(clippy::disallowed_methods)]
    fn wall_clock_millis(&self) -> u64 {
        // A clock set before 1970 yields 0 rather than failing the chat
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64)
    }
}

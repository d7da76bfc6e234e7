//! Virtual-time environment.
//!
//! Time only moves when the test says so, so a driver loop under `SimEnv`
//! runs as fast as the CPU allows and produces the same interleaving on every
//! run.

use std::{
    fmt,
    ops::{Add, Sub},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use huddle_core::Environment;

/// Wall-clock origin reported by [`SimEnv::wall_clock_millis`] at virtual
/// time zero (2024-01-01T00:00:00Z).
pub const SIM_EPOCH_MS: u64 = 1_704_067_200_000;

/// Instant on the virtual clock: time elapsed since the simulation started.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Simulation start.
    pub const ZERO: Self = Self(Duration::ZERO);

    /// Instant at `elapsed` after the start.
    pub fn from_elapsed(elapsed: Duration) -> Self {
        Self(elapsed)
    }

    /// Time since the simulation started.
    pub fn elapsed(self) -> Duration {
        self.0
    }
}

impl fmt::Debug for SimInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t+{}ms", self.0.as_millis())
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs))
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

/// Deterministic environment backed by a shared virtual clock.
///
/// Clones share the clock, so the test and the code under test see the same
/// time.
#[derive(Clone, Default)]
pub struct SimEnv {
    /// Nanoseconds since simulation start
    nanos: Arc<AtomicU64>,
}

impl fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimEnv").field("now", &self.now()).finish()
    }
}

impl SimEnv {
    /// Create a clock at virtual time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Move the clock forward to `instant` (no-op if already past it).
    pub fn advance_to(&self, instant: SimInstant) {
        let target = u64::try_from(instant.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_max(target, Ordering::SeqCst);
    }

    /// Time since simulation start.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.elapsed())
    }

    fn wall_clock_millis(&self) -> u64 {
        SIM_EPOCH_MS + self.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_clock() {
        let env = SimEnv::new();
        let other = env.clone();

        env.advance(Duration::from_millis(250));
        assert_eq!(other.now(), SimInstant::from_elapsed(Duration::from_millis(250)));
        assert_eq!(other.wall_clock_millis(), SIM_EPOCH_MS + 250);
    }

    #[test]
    fn advance_to_never_goes_back() {
        let env = SimEnv::new();
        env.advance(Duration::from_secs(5));
        env.advance_to(SimInstant::from_elapsed(Duration::from_secs(2)));
        assert_eq!(env.elapsed(), Duration::from_secs(5));

        env.advance_to(SimInstant::from_elapsed(Duration::from_secs(7)));
        assert_eq!(env.elapsed(), Duration::from_secs(7));
    }

    #[test]
    fn instant_arithmetic_saturates() {
        let early = SimInstant::from_elapsed(Duration::from_secs(1));
        let late = early + Duration::from_secs(3);
        assert_eq!(late - early, Duration::from_secs(3));
        assert_eq!(early - late, Duration::ZERO);
    }
}

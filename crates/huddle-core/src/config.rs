//! Session timing and capacity configuration.

use std::time::Duration;

/// Silence after which an active participant is forced out.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum time a sequence gap is waited on before it is declared lost.
pub const DEFAULT_REORDER_BUFFER_TIMEOUT: Duration = Duration::from_secs(2);

/// How long an empty room outlives its last participant.
pub const DEFAULT_ROOM_GRACE: Duration = Duration::ZERO;

/// Interval at which the presence monitor scans a room.
pub const DEFAULT_PRESENCE_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Events buffered per participant while waiting on a gap.
pub const DEFAULT_MAX_BUFFERED_EVENTS: usize = 64;

/// Chat messages retained per room.
pub const DEFAULT_CHAT_HISTORY_LIMIT: usize = 100;

/// Maximum chat message length, in characters.
pub const DEFAULT_MAX_CHAT_LENGTH: usize = 2000;

/// Session configuration shared by every room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Silence threshold for forced leave (`heartbeatTimeoutMs`)
    pub heartbeat_timeout: Duration,
    /// Gap wait before skipping (`reorderBufferTimeoutMs`)
    pub reorder_buffer_timeout: Duration,
    /// Empty-room lifetime (`roomGraceMs`)
    pub room_grace: Duration,
    /// Presence scan cadence (`presenceScanIntervalMs`)
    pub presence_scan_interval: Duration,
    /// Reorder buffer bound per participant (`maxBufferedEvents`)
    pub max_buffered_events: usize,
    /// Chat log bound per room (`chatHistoryLimit`)
    pub chat_history_limit: usize,
    /// Chat message length bound (`maxChatLength`)
    pub max_chat_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            reorder_buffer_timeout: DEFAULT_REORDER_BUFFER_TIMEOUT,
            room_grace: DEFAULT_ROOM_GRACE,
            presence_scan_interval: DEFAULT_PRESENCE_SCAN_INTERVAL,
            max_buffered_events: DEFAULT_MAX_BUFFERED_EVENTS,
            chat_history_limit: DEFAULT_CHAT_HISTORY_LIMIT,
            max_chat_length: DEFAULT_MAX_CHAT_LENGTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SessionConfig::default();
        assert_eq!(config.heartbeat_timeout, Duration::from_millis(30_000));
        assert_eq!(config.reorder_buffer_timeout, Duration::from_millis(2_000));
        assert_eq!(config.room_grace, Duration::ZERO);
        assert!(config.max_buffered_events > 0);
    }
}

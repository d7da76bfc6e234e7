//! Runtime configuration.
//!
//! Options come from three layers, later layers winning: built-in defaults,
//! an optional camelCase JSON file, then CLI flags and `HUDDLE_*` environment
//! variables (applied by the binary).

use std::{path::Path, time::Duration};

use huddle_core::{
    SessionConfig,
    config::{
        DEFAULT_CHAT_HISTORY_LIMIT, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_MAX_BUFFERED_EVENTS,
        DEFAULT_MAX_CHAT_LENGTH, DEFAULT_PRESENCE_SCAN_INTERVAL, DEFAULT_REORDER_BUFFER_TIMEOUT,
        DEFAULT_ROOM_GRACE,
    },
};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Default listen address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:7400";

/// Default capacity of each room's command mailbox.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Server configuration for the production runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:7400")
    pub bind_address: String,
    /// Liveness threshold
    pub heartbeat_timeout_ms: u64,
    /// Max wait for a sequence gap
    pub reorder_buffer_timeout_ms: u64,
    /// Empty-room lifetime
    pub room_grace_ms: u64,
    /// Presence scan cadence
    pub presence_scan_interval_ms: u64,
    /// Reorder buffer bound per participant
    pub max_buffered_events: usize,
    /// Chat messages kept per room
    pub chat_history_limit: usize,
    /// Max chat message length in characters
    pub max_chat_length: usize,
    /// Commands queued per room before senders wait
    pub mailbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT.as_millis() as u64,
            reorder_buffer_timeout_ms: DEFAULT_REORDER_BUFFER_TIMEOUT.as_millis() as u64,
            room_grace_ms: DEFAULT_ROOM_GRACE.as_millis() as u64,
            presence_scan_interval_ms: DEFAULT_PRESENCE_SCAN_INTERVAL.as_millis() as u64,
            max_buffered_events: DEFAULT_MAX_BUFFERED_EVENTS,
            chat_history_limit: DEFAULT_CHAT_HISTORY_LIMIT,
            max_chat_length: DEFAULT_MAX_CHAT_LENGTH,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Parse a JSON config document. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ServerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ServerError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ServerError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("failed to read config '{}': {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ServerError> {
        let positive = [
            ("heartbeatTimeoutMs", self.heartbeat_timeout_ms),
            ("reorderBufferTimeoutMs", self.reorder_buffer_timeout_ms),
            ("presenceScanIntervalMs", self.presence_scan_interval_ms),
            ("maxBufferedEvents", self.max_buffered_events as u64),
            ("maxChatLength", self.max_chat_length as u64),
            ("mailboxCapacity", self.mailbox_capacity as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ServerError::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    /// Session settings handed to every room.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            reorder_buffer_timeout: Duration::from_millis(self.reorder_buffer_timeout_ms),
            room_grace: Duration::from_millis(self.room_grace_ms),
            presence_scan_interval: Duration::from_millis(self.presence_scan_interval_ms),
            max_buffered_events: self.max_buffered_events,
            chat_history_limit: self.chat_history_limit,
            max_chat_length: self.max_chat_length,
        }
    }
}

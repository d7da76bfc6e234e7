//! Huddle server binary.
//!
//! # Usage
//!
//! ```bash
//! # Defaults
//! huddle-server --bind 0.0.0.0:7400
//!
//! # Config file, with one option overridden from the environment
//! HUDDLE_ROOM_GRACE_MS=10000 huddle-server --config huddle.json
//! ```

use std::path::PathBuf;

use clap::Parser;
use huddle_server::{Server, ServerConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Huddle session coordinator
#[derive(Parser, Debug)]
#[command(name = "huddle-server")]
#[command(about = "Multi-party real-time session coordinator")]
#[command(version)]
struct Args {
    /// JSON config file (camelCase keys)
    #[arg(short, long, env = "HUDDLE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to
    #[arg(short, long, env = "HUDDLE_BIND")]
    bind: Option<String>,

    /// Silence after which a participant is forced out (ms)
    #[arg(long, env = "HUDDLE_HEARTBEAT_TIMEOUT_MS")]
    heartbeat_timeout_ms: Option<u64>,

    /// Max wait for a missing sequence number (ms)
    #[arg(long, env = "HUDDLE_REORDER_BUFFER_TIMEOUT_MS")]
    reorder_buffer_timeout_ms: Option<u64>,

    /// How long an empty room is kept (ms)
    #[arg(long, env = "HUDDLE_ROOM_GRACE_MS")]
    room_grace_ms: Option<u64>,

    /// Presence scan cadence (ms)
    #[arg(long, env = "HUDDLE_PRESENCE_SCAN_INTERVAL_MS")]
    presence_scan_interval_ms: Option<u64>,

    /// Events buffered per participant while waiting on a gap
    #[arg(long, env = "HUDDLE_MAX_BUFFERED_EVENTS")]
    max_buffered_events: Option<usize>,

    /// Chat messages kept per room
    #[arg(long, env = "HUDDLE_CHAT_HISTORY_LIMIT")]
    chat_history_limit: Option<usize>,

    /// Max chat message length in characters
    #[arg(long, env = "HUDDLE_MAX_CHAT_LENGTH")]
    max_chat_length: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Layer flags and environment variables over the file config.
    fn apply(&self, mut config: ServerConfig) -> ServerConfig {
        if let Some(bind) = &self.bind {
            config.bind_address.clone_from(bind);
        }
        if let Some(ms) = self.heartbeat_timeout_ms {
            config.heartbeat_timeout_ms = ms;
        }
        if let Some(ms) = self.reorder_buffer_timeout_ms {
            config.reorder_buffer_timeout_ms = ms;
        }
        if let Some(ms) = self.room_grace_ms {
            config.room_grace_ms = ms;
        }
        if let Some(ms) = self.presence_scan_interval_ms {
            config.presence_scan_interval_ms = ms;
        }
        if let Some(n) = self.max_buffered_events {
            config.max_buffered_events = n;
        }
        if let Some(n) = self.chat_history_limit {
            config.chat_history_limit = n;
        }
        if let Some(n) = self.max_chat_length {
            config.max_chat_length = n;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    let config = args.apply(config);

    tracing::info!("Huddle server starting");
    tracing::info!(
        heartbeat_timeout_ms = config.heartbeat_timeout_ms,
        reorder_buffer_timeout_ms = config.reorder_buffer_timeout_ms,
        room_grace_ms = config.room_grace_ms,
        "session settings"
    );

    let server = Server::bind(config).await?;
    tracing::info!("Server listening on {}", server.local_addr()?);

    let coordinator = server.coordinator();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            coordinator.shutdown().await;
        }
    });

    server.run().await?;

    Ok(())
}

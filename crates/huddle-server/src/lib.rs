//! Huddle production server.
//!
//! Production runtime for [`huddle_core`]: Tokio for the async runtime, one
//! task per room, and a newline-delimited JSON protocol over TCP.
//!
//! # Architecture
//!
//! This crate provides production "glue" around [`huddle_core`]'s Sans-IO
//! room sessions. Each room's [`RoomSession`](huddle_core::RoomSession) is
//! owned by a [`RoomHandle`]'s actor task, which is the only code that mutates
//! it. The [`Coordinator`] routes operations to those actors. The [`Server`]
//! accepts TCP connections and feeds decoded events to the coordinator.
//!
//! # Components
//!
//! - [`Coordinator`]: async facade over every room (join, leave, media,
//!   chat, subscriptions)
//! - [`RoomHandle`]: mailbox and snapshot channel for one room actor
//! - [`Server`]: TCP accept loop
//! - [`SystemEnv`]: Production environment (Tokio clock, system wall clock)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod actor;
pub mod config;
mod coordinator;
mod error;
mod system_env;
mod transport;
pub mod wire;

use std::{net::SocketAddr, sync::Arc};

pub use actor::RoomHandle;
pub use config::ServerConfig;
pub use coordinator::Coordinator;
pub use error::{CoordinatorError, ServerError};
pub use system_env::SystemEnv;
pub use transport::{MAX_LINE_LENGTH, TcpTransport, handle_connection};
pub use wire::{Outbound, WireError};

/// Production Huddle server.
///
/// Wraps a [`Coordinator`] with a TCP transport.
#[derive(Debug)]
pub struct Server {
    coordinator: Arc<Coordinator>,
    transport: TcpTransport,
}

impl Server {
    /// Validate the configuration and bind the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let transport = TcpTransport::bind(&config.bind_address).await?;
        let coordinator = Arc::new(Coordinator::from_config(&config));
        Ok(Self { coordinator, transport })
    }

    /// Shared coordinator, for embedding or for triggering shutdown.
    pub fn coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Accept connections until the coordinator shuts down.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.transport.local_addr()?);

        loop {
            let accepted = tokio::select! {
                () = self.coordinator.stopped() => break,
                accepted = self.transport.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let coordinator = Arc::clone(&self.coordinator);
                    tokio::spawn(handle_connection(stream, peer, coordinator));
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }

        tracing::info!("Server stopped");
        Ok(())
    }
}

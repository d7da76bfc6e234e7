//! TCP transport carrying newline-delimited JSON.
//!
//! Each connection gets a reader loop that decodes lines and hands events to
//! the [`Coordinator`], and a writer task that serializes acks, errors and
//! room snapshots back onto the socket in the order they were queued.
//!
//! A connection follows every room it successfully joins: it receives the
//! room's current snapshot, then every later commit. Closing a connection
//! does not leave any room. Participants that vanish are removed by the
//! presence monitor once their heartbeats stop.
//!
//! The outbound queue is bounded. Replies wait for room in it; a snapshot
//! push that finds it full disconnects the peer, since a room task must never
//! block on a slow socket.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use futures::{SinkExt, StreamExt};
use huddle_core::{Callback, Delivery, RoomId, Subscription};
use tokio::{
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    sync::mpsc::{self, error::TrySendError},
};
use tokio_util::{
    codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError},
    sync::CancellationToken,
};
use tracing::{debug, info, warn};

use crate::{
    coordinator::Coordinator,
    error::ServerError,
    wire::{self, Outbound, WireError},
};

/// Longest inbound line accepted, in bytes.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Messages queued per connection before the peer counts as lagging.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// TCP listener for the JSON line protocol.
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind a listener.
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind {addr}: {e}")))?;

        info!("TCP transport bound to {}", addr);

        Ok(Self { listener })
    }

    /// Accept a new connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        self.listener
            .accept()
            .await
            .map_err(|e| ServerError::Transport(format!("accept failed: {e}")))
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }
}

/// Serve one connection until the peer closes it or the coordinator stops.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    coordinator: Arc<Coordinator>,
) {
    debug!(%peer, "connection opened");

    let (reader, writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let writer = tokio::spawn(write_loop(FramedWrite::new(writer, LinesCodec::new()), queue));
    let lagging = CancellationToken::new();

    let mut following: HashMap<RoomId, Subscription> = HashMap::new();
    let mut conn = Connection { outbound: &outbound, lagging: &lagging, following: &mut following };

    loop {
        let line = tokio::select! {
            () = coordinator.stopped() => break,
            () = lagging.cancelled() => break,
            line = lines.next() => line,
        };

        let reply = match line {
            None => break,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                Outbound::wire_error(&WireError::TooLong(MAX_LINE_LENGTH))
            },
            Some(Err(LinesCodecError::Io(e))) => {
                debug!(%peer, error = %e, "read error");
                break;
            },
            Some(Ok(line)) if line.trim().is_empty() => continue,
            Some(Ok(line)) => handle_line(&line, &coordinator, &mut conn).await,
        };

        let sent = tokio::select! {
            () = lagging.cancelled() => false,
            result = outbound.send(reply) => result.is_ok(),
        };
        if !sent {
            break;
        }
    }

    if lagging.is_cancelled() {
        let capacity = OUTBOUND_QUEUE_CAPACITY;
        warn!(%peer, capacity, "outbound queue full, dropping connection");
    }

    // Callbacks still hold queue senders until their rooms next commit, so the
    // writer is stopped rather than drained.
    drop(following);
    writer.abort();
    debug!(%peer, "connection closed");
}

/// Per-connection state shared by every inbound line.
struct Connection<'a> {
    outbound: &'a mpsc::Sender<Outbound>,
    lagging: &'a CancellationToken,
    following: &'a mut HashMap<RoomId, Subscription>,
}

async fn handle_line(line: &str, coordinator: &Coordinator, conn: &mut Connection<'_>) -> Outbound {
    let event = match wire::decode_line(line) {
        Ok(event) => event,
        Err(err) => {
            debug!(error = %err, "rejecting inbound line");
            return Outbound::wire_error(&err);
        },
    };

    let room_id = event.room_id.clone();
    let is_join = event.kind.is_join();
    let header = event.clone();

    let delivery = match coordinator.deliver(event).await {
        Ok(delivery) => delivery,
        Err(err) => return Outbound::coordinator_error(&err),
    };

    let applied = matches!(delivery, Delivery::Applied(_));
    if is_join && applied && !conn.following.contains_key(&room_id) {
        let callback = snapshot_pusher(conn.outbound.clone(), conn.lagging.clone());
        match coordinator.follow(&room_id, callback).await {
            Ok(subscription) => {
                conn.following.insert(room_id, subscription);
            },
            Err(err) => warn!(room_id = %room_id, error = %err, "failed to follow room"),
        }
    }

    Outbound::ack(&header, &delivery)
}

/// Room callback queueing snapshots for the writer. Runs on the room's task,
/// so it never waits: a full queue marks the connection as lagging.
fn snapshot_pusher(sink: mpsc::Sender<Outbound>, lagging: CancellationToken) -> Callback {
    Box::new(move |snapshot| {
        if lagging.is_cancelled() {
            return;
        }
        match sink.try_send(Outbound::Snapshot(Arc::clone(snapshot))) {
            Ok(()) | Err(TrySendError::Closed(_)) => {},
            Err(TrySendError::Full(_)) => {
                debug!(room_id = %snapshot.room_id, "snapshot push found queue full");
                lagging.cancel();
            },
        }
    })
}

async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, LinesCodec>,
    mut queue: mpsc::Receiver<Outbound>,
) {
    while let Some(message) = queue.recv().await {
        if let Err(e) = sink.send(message.encode()).await {
            debug!(error = %e, "write failed, closing writer");
            break;
        }
    }
}

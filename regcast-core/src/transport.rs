//! Subscriber delivery capability.
//!
//! The core never talks to sockets directly. Every subscriber holds an
//! `Arc<dyn Transport>` with two synchronous writes: one for binary
//! delta/snapshot buffers and one for JSON control text. Writes are
//! expected to be prompt; there is no back-pressure.
//!
//! [`ChannelTransport`] is the in-process realisation used by the TCP
//! server: writes go into an unbounded queue drained by the
//! connection's writer task. Closing it tombstones the handle, so a
//! broadcast that still holds a clone gets [`TransportError::Closed`]
//! instead of writing into a dead connection.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;

// ── Transport ────────────────────────────────────────────────────

/// A handle capable of delivering data to one client.
pub trait Transport: Send + Sync {
    /// Deliver a binary delta or snapshot.
    fn send_binary(&self, bytes: Bytes) -> Result<(), TransportError>;

    /// Deliver a JSON control message.
    fn send_text(&self, text: String) -> Result<(), TransportError>;
}

/// Shared transport handle as stored in subscriptions.
pub type TransportHandle = Arc<dyn Transport>;

// ── Frame ────────────────────────────────────────────────────────

/// One message on a transport: control text or a binary buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

// ── ChannelTransport ─────────────────────────────────────────────

/// Queue-backed transport with an explicit tombstone.
///
/// The queue is unbounded: sends never block the service lock, so a peer
/// that stops reading lets frames pile up until its connection closes.
/// Memory per connection is therefore bounded only by the connection's
/// lifetime. Shutdown does not wait on such a peer: the writer is stopped
/// on cancellation and a closing connection flushes for at most
/// [`FLUSH_TIMEOUT`](crate::network::connection::FLUSH_TIMEOUT).
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Frame>,
    closed: AtomicBool,
}

impl ChannelTransport {
    /// Create a transport and the receiving end its writer drains.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            tx,
            closed: AtomicBool::new(false),
        });
        (transport, rx)
    }

    /// Tombstone the handle. Every later write fails with `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }

    fn push(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }
}

impl Transport for ChannelTransport {
    fn send_binary(&self, bytes: Bytes) -> Result<(), TransportError> {
        self.push(Frame::Binary(bytes))
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.push(Frame::Text(text))
    }
}

impl fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────

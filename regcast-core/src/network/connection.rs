use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::FrameCodec;
use crate::error::RegcastError;
use crate::message::{Request, Response};
use crate::service::SyncService;
use crate::transport::{ChannelTransport, Frame, TransportHandle};

/// How long a closing connection may spend flushing queued frames.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

// ── ConnectionRegistry ───────────────────────────────────────────

/// One open client connection.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub peer: SocketAddr,
    pub transport: Arc<ChannelTransport>,
    pub opened_at: Instant,
}

/// Open connections keyed by client id.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<String, ConnectionEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, client_id: String, entry: ConnectionEntry) {
        self.inner.write().await.insert(client_id, entry);
    }

    pub async fn remove(&self, client_id: &str) -> Option<ConnectionEntry> {
        self.inner.write().await.remove(client_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Tombstone every open transport. Returns how many were open.
    pub async fn close_all(&self) -> usize {
        let open = self.inner.read().await;
        for (client_id, entry) in open.iter() {
            entry.transport.close();
            debug!(
                client_id = %client_id,
                peer = %entry.peer,
                age_ms = entry.opened_at.elapsed().as_millis() as u64,
                "closing connection"
            );
        }
        open.len()
    }
}

// ── Server side ──────────────────────────────────────────────────

/// Serve one accepted TCP connection until the peer disconnects, the
/// stream fails, or `cancel` fires.
///
/// Cancellation stops the writer immediately. On any other exit queued
/// frames get up to [`FLUSH_TIMEOUT`] to drain.
///
/// The connection is assigned a fresh v4 UUID as its client id. Text
/// frames are dispatched to [`SyncService::handle_message`] and the
/// reply is queued on the same transport; binary frames from the client
/// are ignored. On exit the transport is tombstoned and every
/// subscription of the client is dropped.
pub async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<SyncService>,
    connections: ConnectionRegistry,
    cancel: CancellationToken,
) -> Result<(), RegcastError> {
    let client_id = Uuid::new_v4().to_string();
    let (transport, mut outbound) = ChannelTransport::new();
    let handle: TransportHandle = transport.clone();

    connections
        .insert(
            client_id.clone(),
            ConnectionEntry {
                peer,
                transport: Arc::clone(&transport),
                opened_at: Instant::now(),
            },
        )
        .await;

    let (mut net_writer, mut net_reader) = Framed::new(stream, FrameCodec).split();

    // Writer task: transport queue -> network. Stops on `stop` even when
    // the peer has stopped reading and a send is pending.
    let stop = cancel.child_token();
    let writer_id = client_id.clone();
    let writer_stop = stop.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = writer_stop.cancelled() => break,
                frame = outbound.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            tokio::select! {
                _ = writer_stop.cancelled() => break,
                sent = net_writer.send(frame) => {
                    if let Err(e) = sent {
                        debug!(client_id = %writer_id, "write failed: {e}");
                        break;
                    }
                }
            }
        }
    });

    info!(client_id = %client_id, %peer, "client connected");

    let result = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            next = net_reader.next() => next,
        };

        match next {
            None => break Ok(()),
            Some(Err(e)) => break Err(e),
            Some(Ok(Frame::Text(text))) => {
                let reply = service.handle_message(&client_id, &text, &handle).await;
                match reply.to_json() {
                    Ok(json) => {
                        if let Err(e) = handle.send_text(json) {
                            break Err(e.into());
                        }
                    }
                    Err(e) => warn!(client_id = %client_id, "failed to encode reply: {e}"),
                }
            }
            Some(Ok(Frame::Binary(bytes))) => {
                debug!(client_id = %client_id, len = bytes.len(), "ignoring binary frame");
            }
        }
    };

    transport.close();
    let dropped = service.drop_client(&client_id).await;
    connections.remove(&client_id).await;
    drop(handle);
    drop(transport);
    // Flush whatever was queued before the tombstone, but never wait on a
    // peer that stopped reading.
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
        debug!(client_id = %client_id, "flush timed out; dropping queued frames");
        stop.cancel();
        let _ = writer.await;
    }

    match &result {
        Ok(()) => info!(client_id = %client_id, dropped, "client disconnected"),
        Err(e) => warn!(client_id = %client_id, dropped, "client connection failed: {e}"),
    }
    result
}

// ── Client side ──────────────────────────────────────────────────

/// Client end of a framed connection.
#[derive(Debug)]
pub struct Connection {
    framed: Framed<TcpStream, FrameCodec>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec),
        }
    }

    pub async fn connect(conn_info: &ConnectionInfo) -> Result<Self, RegcastError> {
        let stream = TcpStream::connect(conn_info.addr()).await?;
        Ok(Self::new(stream))
    }

    /// Send a control request.
    pub async fn send(&mut self, request: &Request) -> Result<(), RegcastError> {
        self.send_frame(Frame::Text(request.to_json()?)).await
    }

    pub async fn send_frame(&mut self, frame: Frame) -> Result<(), RegcastError> {
        self.framed.send(frame).await
    }

    /// Next frame from the server; `None` once the server closes.
    pub async fn recv(&mut self) -> Option<Result<Frame, RegcastError>> {
        self.framed.next().await
    }

    /// Next text frame parsed as a [`Response`], skipping binary frames.
    pub async fn recv_response(&mut self) -> Result<Option<Response>, RegcastError> {
        while let Some(frame) = self.recv().await {
            if let Frame::Text(text) = frame? {
                return Response::parse(&text).map(Some);
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    ip: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `ip:port` form accepted by `TcpStream::connect` and
    /// `TcpListener::bind`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl From<SocketAddr> for ConnectionInfo {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

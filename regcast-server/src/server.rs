//! TCP accept loop.
//!
//! Every accepted connection is served on its own task by
//! [`serve_connection`] against the shared [`SyncService`]. Connections
//! beyond `max_connections` are closed immediately after accept.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use regcast_core::{ConnectionRegistry, RegcastError, SyncService, serve_connection};

// ── Server ───────────────────────────────────────────────────────

pub struct Server {
    service: Arc<SyncService>,
    connections: ConnectionRegistry,
    max_connections: usize,
}

impl Server {
    pub fn new(service: Arc<SyncService>, max_connections: usize) -> Self {
        Self {
            service,
            connections: ConnectionRegistry::new(),
            max_connections: max_connections.max(1),
        }
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Accept clients until `cancel` fires, then wait for every
    /// connection task to finish.
    pub async fn run(&self, listener: TcpListener, cancel: CancellationToken) -> Result<(), RegcastError> {
        let limit = Arc::new(Semaphore::new(self.max_connections));
        let mut tasks = JoinSet::new();
        info!("listening on {}", listener.local_addr()?);

        loop {
            let accept = tokio::select! {
                _ = cancel.cancelled() => break,
                result = listener.accept() => result,
            };

            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            let Ok(permit) = Arc::clone(&limit).try_acquire_owned() else {
                warn!(%peer, max = self.max_connections, "connection limit reached; rejecting");
                drop(stream);
                continue;
            };

            let service = Arc::clone(&self.service);
            let connections = self.connections.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                if let Err(e) = serve_connection(stream, peer, service, connections, cancel).await {
                    debug!(%peer, "connection ended with error: {e}");
                }
                drop(permit);
            });

            // Reap finished connection tasks.
            while tasks.try_join_next().is_some() {}
        }

        let open = self.connections.close_all().await;
        info!(open, "accept loop stopped; closing connections");
        while tasks.join_next().await.is_some() {}
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use regcast_core::{
        Connection, ConnectionInfo, Request, RequestKind, ResponseKind, ServiceConfig,
    };

    fn small_service() -> Arc<SyncService> {
        let config = ServiceConfig {
            device_count: 1,
            registers_per_device: 16,
            ..ServiceConfig::default()
        };
        Arc::new(SyncService::new(config).unwrap())
    }

    async fn start(max_connections: usize) -> (Arc<Server>, ConnectionInfo, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let info = ConnectionInfo::from(listener.local_addr().unwrap());
        let server = Arc::new(Server::new(small_service(), max_connections));
        let cancel = CancellationToken::new();
        tokio::spawn({
            let server = Arc::clone(&server);
            let cancel = cancel.clone();
            async move { server.run(listener, cancel).await.unwrap() }
        });
        (server, info, cancel)
    }

    #[tokio::test]
    async fn serves_requests() {
        let (_server, info, cancel) = start(4).await;
        let mut conn = Connection::connect(&info).await.unwrap();
        conn.send(&Request::new(RequestKind::Inspect, "").with_request_id(2))
            .await
            .unwrap();
        let resp = tokio::time::timeout(Duration::from_secs(5), conn.recv_response())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(resp.kind, ResponseKind::Inspect);
        assert_eq!(resp.request_id, 2);
        cancel.cancel();
    }

    #[tokio::test]
    async fn rejects_beyond_connection_limit() {
        let (server, info, cancel) = start(1).await;
        let mut first = Connection::connect(&info).await.unwrap();
        first
            .send(&Request::new(RequestKind::Inspect, ""))
            .await
            .unwrap();
        first.recv_response().await.unwrap().unwrap();
        assert_eq!(server.connections().len().await, 1);

        let mut second = Connection::connect(&info).await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), second.recv())
            .await
            .unwrap();
        assert!(next.is_none());
        cancel.cancel();
    }

    #[tokio::test]
    async fn shutdown_completes_with_stalled_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let info = ConnectionInfo::from(listener.local_addr().unwrap());
        let config = ServiceConfig {
            device_count: 1,
            registers_per_device: 65_536,
            ..ServiceConfig::default()
        };
        let server = Arc::new(Server::new(Arc::new(SyncService::new(config).unwrap()), 4));
        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let server = Arc::clone(&server);
            let cancel = cancel.clone();
            async move { server.run(listener, cancel).await }
        });

        // Queue megabytes of snapshots and never read them.
        let mut conn = Connection::connect(&info).await.unwrap();
        for _ in 0..50 {
            conn.send(&Request::new(RequestKind::Subscribe, "device_1"))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("server did not stop with a stalled peer")
            .unwrap()
            .unwrap();
        assert!(server.connections().is_empty().await);
        drop(conn);
    }

    #[tokio::test]
    async fn cancel_stops_accept_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Server::new(small_service(), 4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), server.run(listener, cancel))
            .await
            .unwrap()
            .unwrap();
    }
}

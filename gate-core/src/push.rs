use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::server::{GroupPushResult, TcpServer};

/// The backend-facing push surface: unicast, multicast and broadcast delivery of
/// server-initiated packets to connected clients.
///
/// A real deployment exposes this over gRPC/HTTP via the ambient transport framework, out of
/// scope here; this crate ships the in-process adapter below so the gateway is runnable and
/// testable without one.
#[async_trait]
pub trait PushRpc: Send + Sync {
    async fn push(&self, uid: i64, pack: Vec<u8>) -> Result<()>;
    async fn multicast(&self, uids: &[i64], pack: Vec<u8>) -> GroupPushResult;
    async fn broadcast(&self, pack: Vec<u8>) -> GroupPushResult;
}

/// Minimal in-process adapter: each RPC just defers to the server's corresponding method.
///
/// Grounded on SPEC_FULL.md §4.H: the three push RPCs are thin wrappers, not a protocol of
/// their own.
pub struct GatePushService {
    server: Arc<TcpServer>,
}

impl GatePushService {
    pub fn new(server: Arc<TcpServer>) -> GatePushService {
        GatePushService { server }
    }
}

#[async_trait]
impl PushRpc for GatePushService {
    async fn push(&self, uid: i64, pack: Vec<u8>) -> Result<()> {
        self.server.push(uid, pack).await
    }

    async fn multicast(&self, uids: &[i64], pack: Vec<u8>) -> GroupPushResult {
        self.server.push_group(uids, pack).await
    }

    async fn broadcast(&self, pack: Vec<u8>) -> GroupPushResult {
        self.server.broadcast(pack).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SlabPool;
    use crate::error::GateError;
    use crate::protocol::Packet;
    use crate::server::ServerConfig;
    use crate::service::Service;
    use crate::session::Session;
    use crate::tunnel::{Tunnel, TunnelType};
    use slog::Logger;

    struct StubService;

    #[async_trait]
    impl Service for StubService {
        async fn auth(&self, body: &[u8]) -> Result<(Vec<u8>, Arc<Session>)> {
            Ok((body.to_vec(), Arc::new(Session::default_session())))
        }
        fn tunnel_type(&self, _module: i32) -> TunnelType {
            TunnelType::Player
        }
        async fn create_tunnel(
            &self,
            _tp: TunnelType,
            _oid: i64,
            _worker: &Arc<crate::worker::Worker>,
        ) -> Result<Arc<Tunnel>> {
            Err(GateError::Protocol("not used in this test"))
        }
        async fn on_connected(&self, _session: &Arc<Session>) {}
        async fn on_disconnect(&self, _session: &Arc<Session>) {}
        async fn handle(&self, _session: &Arc<Session>, _worker: &Arc<crate::worker::Worker>, _packet: Packet) -> Result<()> {
            Ok(())
        }
    }

    fn test_server() -> Arc<TcpServer> {
        Arc::new(TcpServer::new(
            ServerConfig::new("127.0.0.1:0"),
            Arc::new(StubService),
            Arc::new(SlabPool::new(64, 16384, 2).unwrap()),
            Logger::root(slog::Discard, slog::o!()),
        ))
    }

    #[tokio::test]
    async fn push_defers_to_server_and_reports_not_found() {
        let rpc = GatePushService::new(test_server());
        let err = rpc.push(7, vec![1]).await.unwrap_err();
        assert!(matches!(err, GateError::NotFound(_)));
    }

    #[tokio::test]
    async fn multicast_and_broadcast_defer_to_server() {
        let rpc = GatePushService::new(test_server());
        let multi = rpc.multicast(&[1, 2], vec![1]).await;
        assert_eq!(multi.failures.len(), 2);

        let all = rpc.broadcast(vec![1]).await;
        assert!(all.is_ok());
    }
}

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::Packet;
use crate::session::Session;
use crate::tunnel::{Tunnel, TunnelType};
use crate::worker::Worker;

/// The seam the application plugs into: everything the gateway core needs from the thing that
/// knows what packets mean. One implementation per deployment; a reference implementation lives
/// in the binary crate so this crate is runnable end-to-end.
///
/// Grounded on `app/gate/internal/service.Service` (`pkg/net/server.go`'s `Service` field).
///
/// `handle` takes an already-decoded [`Packet`] rather than raw bytes: the worker decodes the
/// frame body exactly once, centrally, in its own read path, so the service never has to repeat
/// that step (and can't get the CS-index/compression handling subtly out of sync with it).
#[async_trait]
pub trait Service: Send + Sync {
    /// Authenticates the handshake frame body, returning the already wire-ready reply (RSA
    /// encrypted when crypto is enabled system-wide) and the freshly built session. All
    /// handshake crypto happens here, against the process-wide `secrets` singleton, keeping the
    /// worker itself crypto-agnostic on this path.
    async fn auth(&self, body: &[u8]) -> Result<(Vec<u8>, Arc<Session>)>;

    /// Routes a client module id to the tunnel type that owns it.
    fn tunnel_type(&self, module: i32) -> TunnelType;

    /// Builds a fresh tunnel for `(tp, oid)`. Called by the worker at most once per live
    /// `(tp, oid)` pair; the worker's tunnel holder handles the double-checked-locking.
    async fn create_tunnel(&self, tp: TunnelType, oid: i64, worker: &Arc<Worker>) -> Result<Arc<Tunnel>>;

    /// Runs once, right after a successful handshake, before any client packets are processed.
    async fn on_connected(&self, session: &Arc<Session>);

    /// Runs once during worker shutdown, budgeted by the worker's stop timeout. Never called if
    /// the connection never reached a successful handshake.
    async fn on_disconnect(&self, session: &Arc<Session>);

    /// Dispatches one decoded client packet: the reference implementation validates the CS
    /// index, decompresses, defaults `obj` to the caller's own uid, and forwards to the packet's
    /// tunnel.
    async fn handle(&self, session: &Arc<Session>, worker: &Arc<Worker>, packet: Packet) -> Result<()>;
}

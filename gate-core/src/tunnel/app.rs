use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{Packet, MODULE_ID_ROOM};
use crate::session::Session;

/// Which application owns a given tunnel. See SPEC_FULL.md §4.F.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelType {
    /// The main tunnel: every connection has exactly one, and its death tears the worker down.
    Player,
    Room,
    Team,
    Fight,
    Chat,
    Mail,
}

impl TunnelType {
    /// Routes by client module id. Every module goes to the player tunnel except `MODULE_ID_ROOM`.
    pub fn from_module(module: i32) -> TunnelType {
        if module == MODULE_ID_ROOM {
            TunnelType::Room
        } else {
            TunnelType::Player
        }
    }
}

/// A client packet, stripped down to what crosses the gateway/backend boundary.
#[derive(Debug, Clone)]
pub struct ForwardMessage {
    pub module: i32,
    pub seq: i32,
    pub obj: i64,
    pub data: Vec<u8>,
    pub data_version: i32,
}

impl ForwardMessage {
    pub fn from_packet(p: &Packet) -> ForwardMessage {
        ForwardMessage {
            module: p.module,
            seq: p.seq,
            obj: p.obj,
            data: p.data.clone(),
            data_version: p.data_version,
        }
    }
}

/// Application-specific tunnel behaviour, plugged into the generic [`super::runtime::Tunnel`]
/// runtime. One implementation per [`TunnelType`] — see `player.rs`/`room.rs`.
///
/// Grounded on `tunnels/tunnel.go`'s `AppTunnel`/`AppTunnelBase` interfaces.
#[async_trait]
pub trait AppTunnel: Send + Sync {
    fn tunnel_type(&self) -> TunnelType;
    fn uid(&self) -> i64;
    fn oid(&self) -> i64;
    fn color(&self) -> String;
    fn session(&self) -> &Arc<Session>;

    /// Forwards one client message to the backend. Errors here end the tunnel's cs loop.
    async fn cs_handle(&self, msg: ForwardMessage) -> Result<()>;

    /// Blocks until the backend has a message to deliver to the client. Errors here end the
    /// tunnel's sc loop.
    async fn sc_handle(&self) -> Result<ForwardMessage>;

    /// Runs once, after the tunnel's cs/sc loops have both exited, regardless of cause.
    async fn on_stop(&self);

    /// Runs once the tunnel's task group as a whole is winding down; `reason` is `None` for a
    /// clean shutdown. Player tunnels use this to arm the worker's disconnect countdown.
    async fn on_group_stop(&self, reason: Option<String>);
}

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{BackendStream, Message};
use crate::error::Result;
use crate::session::Session;

use super::app::{AppTunnel, ForwardMessage, TunnelType};

/// A room tunnel is bound to a single room id for its whole life. Unlike the player (main)
/// tunnel, its death only tears down the backend stream — it never takes the worker with it.
///
/// Grounded on `tunnels/room/tunnel.go`.
pub struct RoomTunnel {
    session: Arc<Session>,
    oid: i64,
    stream: Arc<dyn BackendStream>,
    color: String,
}

impl RoomTunnel {
    pub fn new(session: Arc<Session>, oid: i64, stream: Arc<dyn BackendStream>) -> RoomTunnel {
        let color = session.color().to_string();
        RoomTunnel {
            session,
            oid,
            stream,
            color,
        }
    }
}

#[async_trait]
impl AppTunnel for RoomTunnel {
    fn tunnel_type(&self) -> TunnelType {
        TunnelType::Room
    }

    fn uid(&self) -> i64 {
        self.session.uid()
    }

    fn oid(&self) -> i64 {
        self.oid
    }

    fn color(&self) -> String {
        self.color.clone()
    }

    fn session(&self) -> &Arc<Session> {
        &self.session
    }

    async fn cs_handle(&self, msg: ForwardMessage) -> Result<()> {
        self.stream
            .send(Message {
                module: msg.module,
                seq: msg.seq,
                obj: msg.obj,
                data: msg.data,
                data_version: msg.data_version,
            })
            .await
    }

    async fn sc_handle(&self) -> Result<ForwardMessage> {
        let msg = self.stream.recv().await?;
        Ok(ForwardMessage {
            module: msg.module,
            seq: msg.seq,
            obj: msg.obj,
            data: msg.data,
            data_version: msg.data_version,
        })
    }

    async fn on_stop(&self) {
        let _ = self.stream.close_send().await;
    }

    async fn on_group_stop(&self, _reason: Option<String>) {
        // A room's backend stream dying is local to that room; it must not cascade to the
        // worker the way a player tunnel's death does.
    }
}

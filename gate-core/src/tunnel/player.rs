use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::backend::{BackendStream, Message};
use crate::error::Result;
use crate::routetable::{RouteTable, HOLDER_CACHE_TIMEOUT};
use crate::session::Session;

use super::app::{AppTunnel, ForwardMessage, TunnelType};

/// Hooks into the owning worker a player tunnel needs. Implemented by `worker::Worker`.
pub trait WorkerControl: Send + Sync {
    /// Clears any pending shutdown countdown (called when the main tunnel (re)connects).
    fn reset_stop_countdown(&self);
    /// Arms the shutdown countdown starting at `now` (called when the main tunnel disconnects).
    fn set_stop_countdown_time(&self, now: SystemTime);
}

/// The player tunnel is the connection's main tunnel: its death tears the whole worker down.
///
/// Grounded on `tunnels/player/tunnel.go`.
pub struct PlayerTunnel {
    session: Arc<Session>,
    worker: Arc<dyn WorkerControl>,
    route_table: Arc<dyn RouteTable>,
    stream: Arc<dyn BackendStream>,
    color: String,
}

impl PlayerTunnel {
    pub fn new(
        session: Arc<Session>,
        worker: Arc<dyn WorkerControl>,
        route_table: Arc<dyn RouteTable>,
        stream: Arc<dyn BackendStream>,
    ) -> PlayerTunnel {
        // A reconnect on the main tunnel cancels any pending worker shutdown countdown.
        worker.reset_stop_countdown();
        let color = session.color().to_string();
        PlayerTunnel {
            session,
            worker,
            route_table,
            stream,
            color,
        }
    }
}

#[async_trait]
impl AppTunnel for PlayerTunnel {
    fn tunnel_type(&self) -> TunnelType {
        TunnelType::Player
    }

    fn uid(&self) -> i64 {
        self.session.uid()
    }

    fn oid(&self) -> i64 {
        self.session.uid()
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
        // Only this user's own route entry, so it's safe to reclaim after a short grace period
        // in case of a fast reconnect.
        let _ = self
            .route_table
            .del_delay(&self.color, self.uid(), HOLDER_CACHE_TIMEOUT)
            .await;
        let _ = self.stream.close_send().await;
    }

    async fn on_group_stop(&self, _reason: Option<String>) {
        self.worker.set_stop_countdown_time(SystemTime::now());
    }
}

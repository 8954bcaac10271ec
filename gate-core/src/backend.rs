use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::{GateError, Result};

/// One message crossing the gateway/backend boundary, independent of wire encoding.
#[derive(Debug, Clone)]
pub struct Message {
    pub module: i32,
    pub seq: i32,
    pub obj: i64,
    pub data: Vec<u8>,
    pub data_version: i32,
}

/// Streaming contract a tunnel depends on to talk to its backend service.
///
/// Grounded on the bidirectional gRPC stream (`intrav1.TunnelService_TunnelClient`) that
/// `player.Tunnel`/`room.Tunnel` hold in the original; the real transport (service discovery,
/// load balancing, gRPC) is explicitly out of scope per SPEC_FULL.md §4.I, so this crate only
/// defines the trait plus one concrete loopback implementation.
#[async_trait]
pub trait BackendStream: Send + Sync {
    async fn send(&self, msg: Message) -> Result<()>;
    async fn recv(&self) -> Result<Message>;
    async fn close_send(&self) -> Result<()>;
}

const BACKEND_CHANNEL_SIZE: usize = 256;

/// In-process backend stream built from a pair of bounded mpsc channels. Stands in for the
/// generated gRPC client stream in tests and local demos.
pub struct ChannelBackendStream {
    tx: mpsc::Sender<Message>,
    rx: Mutex<mpsc::Receiver<Message>>,
}

impl ChannelBackendStream {
    /// Builds two streams wired to each other: whatever side A sends, side B receives.
    pub fn pair() -> (ChannelBackendStream, ChannelBackendStream) {
        let (tx_a, rx_a) = mpsc::channel(BACKEND_CHANNEL_SIZE);
        let (tx_b, rx_b) = mpsc::channel(BACKEND_CHANNEL_SIZE);
        (
            ChannelBackendStream {
                tx: tx_a,
                rx: Mutex::new(rx_b),
            },
            ChannelBackendStream {
                tx: tx_b,
                rx: Mutex::new(rx_a),
            },
        )
    }
}

#[async_trait]
impl BackendStream for ChannelBackendStream {
    async fn send(&self, msg: Message) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| GateError::Backend("channel backend stream closed".into()))
    }

    async fn recv(&self) -> Result<Message> {
        let mut rx = self.rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| GateError::Backend("channel backend stream closed".into()))
    }

    async fn close_send(&self) -> Result<()> {
        Ok(())
    }
}

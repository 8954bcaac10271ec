use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use slog::Logger;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{GateError, Result};
use crate::middleware;
use crate::protocol::Packet;
use crate::stopper::Stopper;

use super::app::{AppTunnel, ForwardMessage, TunnelType};

/// Sink a tunnel uses to deliver server-initiated bytes back to the client, implemented by
/// `worker.rs`'s `Worker` (it just forwards onto the reply channel).
#[async_trait]
pub trait Pusher: Send + Sync {
    async fn push(&self, pack: Vec<u8>) -> Result<()>;
}

const CS_CHANNEL_SIZE: usize = 1024;
const TUNNEL_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Generic per-(type, oid) tunnel runtime: owns a bounded CS channel and runs the app's cs/sc
/// loops as cooperating tasks under a shared cancellation scope.
///
/// Grounded on `tunnels/tunnel.go`'s `Tunnel`: `csChan` sized 1024, an errgroup of
/// stop-waiter/cs-loop/sc-loop tasks, `OnGroupStop` firing when any of them exits.
pub struct Tunnel {
    app: Arc<dyn AppTunnel>,
    pusher: Arc<dyn Pusher>,
    stopper: Arc<Stopper>,
    cs_tx: mpsc::Sender<ForwardMessage>,
    log: Logger,
}

impl Tunnel {
    /// Builds the tunnel and spawns its task group. Returned handle is live immediately.
    pub fn spawn(app: Arc<dyn AppTunnel>, pusher: Arc<dyn Pusher>, log: Logger) -> Arc<Tunnel> {
        let (cs_tx, cs_rx) = mpsc::channel(CS_CHANNEL_SIZE);
        let stopper = Arc::new(Stopper::new(TUNNEL_STOP_TIMEOUT));

        let tunnel = Arc::new(Tunnel {
            app,
            pusher,
            stopper,
            cs_tx,
            log,
        });

        tokio::spawn(tunnel.clone().run(cs_rx));
        tunnel
    }

    pub fn tunnel_type(&self) -> TunnelType {
        self.app.tunnel_type()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopper.is_stopping()
    }

    pub fn trigger_stop(&self) {
        self.stopper.trigger_stop();
    }

    pub async fn wait_stopped(&self) {
        self.stopper.wait_stopped().await;
    }

    /// Transforms `packet` and queues it for the cs loop. Rejects once stopping.
    pub async fn forward(&self, packet: &Packet) -> Result<()> {
        if self.is_stopping() {
            return Err(GateError::Stopping("tunnel is stopping"));
        }

        let msg = ForwardMessage::from_packet(packet);
        self.cs_tx
            .send(msg)
            .await
            .map_err(|_| GateError::Stopping("tunnel cs channel closed"))
    }

    async fn run(self: Arc<Self>, mut cs_rx: mpsc::Receiver<ForwardMessage>) {
        let cancel = CancellationToken::new();

        let waiter = {
            let stopper = self.stopper.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                stopper.stop_triggered().await;
                cancel.cancel();
            })
        };

        let cs_task = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let reason = this.cs_loop(&mut cs_rx, &cancel).await;
                cancel.cancel();
                reason
            })
        };

        let sc_task = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let reason = this.sc_loop(&cancel).await;
                cancel.cancel();
                reason
            })
        };

        let (cs_reason, sc_reason) = tokio::join!(cs_task, sc_task);
        let _ = waiter.await;

        let reason = cs_reason
            .ok()
            .flatten()
            .or_else(|| sc_reason.ok().flatten());

        if reason.is_some() {
            self.app.on_group_stop(reason).await;
        }
        self.stopper
            .do_stop(async {
                self.app.on_stop().await;
            })
            .await;
    }

    async fn cs_loop(
        &self,
        cs_rx: &mut mpsc::Receiver<ForwardMessage>,
        cancel: &CancellationToken,
    ) -> Option<String> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                msg = cs_rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if let Err(e) = self.app.cs_handle(msg).await {
                                return Some(e.to_string());
                            }
                        }
                        None => return None,
                    }
                }
            }
        }
    }

    async fn sc_loop(&self, cancel: &CancellationToken) -> Option<String> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                result = self.app.sc_handle() => {
                    match result {
                        Ok(msg) => {
                            if let Err(e) = self.push_sc(msg).await {
                                middleware::log_push_failed(&self.log, self.app.uid(), &e);
                            }
                        }
                        Err(e) => return Some(e.to_string()),
                    }
                }
            }
        }
    }

    async fn push_sc(&self, msg: ForwardMessage) -> Result<()> {
        let mut packet = Packet::new(msg.module, msg.seq, msg.obj, msg.data);
        packet.data_version = msg.data_version;
        packet.compress_in_place()?;
        packet.index = self.app.session().increase_sc_index() as i32;

        let bytes = packet.encode()?;
        self.pusher.push(bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    struct EchoApp {
        session: Arc<Session>,
        seen: Mutex<Vec<ForwardMessage>>,
        replies: tokio::sync::Mutex<mpsc::Receiver<ForwardMessage>>,
        stopped: AtomicUsize,
    }

    #[async_trait]
    impl AppTunnel for EchoApp {
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
            self.session.color().to_string()
        }
        fn session(&self) -> &Arc<Session> {
            &self.session
        }
        async fn cs_handle(&self, msg: ForwardMessage) -> Result<()> {
            self.seen.lock().push(msg);
            Ok(())
        }
        async fn sc_handle(&self) -> Result<ForwardMessage> {
            let mut rx = self.replies.lock().await;
            rx.recv()
                .await
                .ok_or(GateError::Stopping("replies closed"))
        }
        async fn on_stop(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_group_stop(&self, _reason: Option<String>) {}
    }

    struct CollectingPusher {
        out: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Pusher for CollectingPusher {
        async fn push(&self, pack: Vec<u8>) -> Result<()> {
            self.out.lock().push(pack);
            Ok(())
        }
    }

    #[tokio::test]
    async fn forward_reaches_cs_handle() {
        let (_reply_tx, reply_rx) = mpsc::channel(8);
        let app = Arc::new(EchoApp {
            session: Arc::new(Session::default_session()),
            seen: Mutex::new(Vec::new()),
            replies: tokio::sync::Mutex::new(reply_rx),
            stopped: AtomicUsize::new(0),
        });
        let pusher = Arc::new(CollectingPusher {
            out: Mutex::new(Vec::new()),
        });

        let tunnel = Tunnel::spawn(app.clone(), pusher, test_logger());
        let packet = Packet::new(0, 5, 1, vec![9, 9]);
        tunnel.forward(&packet).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(app.seen.lock().len(), 1);

        tunnel.trigger_stop();
        tunnel.wait_stopped().await;
        assert_eq!(app.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sc_handle_results_are_pushed() {
        let (reply_tx, reply_rx) = mpsc::channel(8);
        let app = Arc::new(EchoApp {
            session: Arc::new(Session::default_session()),
            seen: Mutex::new(Vec::new()),
            replies: tokio::sync::Mutex::new(reply_rx),
            stopped: AtomicUsize::new(0),
        });
        let pusher = Arc::new(CollectingPusher {
            out: Mutex::new(Vec::new()),
        });

        let tunnel = Tunnel::spawn(app, pusher.clone(), test_logger());
        reply_tx
            .send(ForwardMessage {
                module: 2,
                seq: 3,
                obj: 1,
                data: vec![1, 2, 3],
                data_version: 0,
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pusher.out.lock().len(), 1);

        tunnel.trigger_stop();
        tunnel.wait_stopped().await;
    }

    #[tokio::test]
    async fn forward_rejected_once_stopping() {
        let (_reply_tx, reply_rx) = mpsc::channel(8);
        let app = Arc::new(EchoApp {
            session: Arc::new(Session::default_session()),
            seen: Mutex::new(Vec::new()),
            replies: tokio::sync::Mutex::new(reply_rx),
            stopped: AtomicUsize::new(0),
        });
        let pusher = Arc::new(CollectingPusher {
            out: Mutex::new(Vec::new()),
        });

        let tunnel = Tunnel::spawn(app, pusher, test_logger());
        tunnel.trigger_stop();
        tunnel.wait_stopped().await;

        let packet = Packet::new(0, 5, 1, vec![]);
        assert!(tunnel.forward(&packet).await.is_err());
    }
}

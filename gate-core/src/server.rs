use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use slog::Logger;
use tokio::net::{TcpListener, TcpStream};

use crate::buffer::SlabPool;
use crate::error::{GateError, Result};
use crate::registry::Registry;
use crate::service::Service;
use crate::stopper::Stopper;
use crate::worker::{Worker, WorkerConfig};

/// Transport kind a server listens on. Only [`NetKind::Tcp`] is implemented; the type exists so
/// the rest of the crate names the concept rather than hardcoding TCP everywhere. UDP/KCP/
/// WebSocket transports are out of scope (see SPEC_FULL.md's Non-goals).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetKind {
    Tcp,
}

/// Tunables for [`TcpServer`]. Defaults mirror SPEC_FULL.md §5.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Number of tasks concurrently calling `accept` on the same listener. Defaults to the
    /// available parallelism, matching `pkg/net/server.go`'s `WorkerSize`.
    pub acceptor_count: usize,
    pub registry_shard_count: u32,
    pub registry_capacity_hint: usize,
    pub stop_timeout: Duration,
    /// Whether accepted sockets get `SO_KEEPALIVE` turned on. See SPEC_FULL.md §4.F.
    pub keepalive: bool,
    /// `SO_RCVBUF` applied to each accepted socket, if set.
    pub read_buffer_size: Option<usize>,
    /// `SO_SNDBUF` applied to each accepted socket, if set.
    pub write_buffer_size: Option<usize>,
    pub worker: WorkerConfig,
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<String>) -> ServerConfig {
        let acceptor_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        ServerConfig {
            bind_addr: bind_addr.into(),
            acceptor_count,
            registry_shard_count: 32,
            registry_capacity_hint: 1024,
            stop_timeout: Duration::from_secs(30),
            keepalive: true,
            read_buffer_size: None,
            write_buffer_size: None,
            worker: WorkerConfig::default(),
        }
    }
}

/// Hooks run right after a worker joins/leaves the registry. Both receive the worker's
/// `(color, uid)`, matching `pkg/net/server.go`'s `AfterConnectFunc`/`AfterDisconnectFunc`.
pub type ConnectHook = Arc<dyn Fn(String, i64) + Send + Sync>;

/// The TCP listener, connection registry and push API for a gateway deployment.
///
/// Grounded on `pkg/net/server.go`'s `Server`: an acceptor pool feeding freshly built workers
/// into a shared [`Registry`], plus the aggregate push/broadcast surface described in
/// SPEC_FULL.md §4.F/§7.
pub struct TcpServer {
    config: ServerConfig,
    registry: Arc<Registry<Worker>>,
    service: Arc<dyn Service>,
    pool: Arc<SlabPool>,
    next_wid: AtomicU64,
    stopper: Arc<Stopper>,
    log: Logger,
    after_connect: Option<ConnectHook>,
    after_disconnect: Option<ConnectHook>,
}

/// Best-effort push/broadcast result: which uids failed and why. A non-empty `failures` list
/// does not mean the whole call failed — every uid not listed was delivered.
#[derive(Debug, Default)]
pub struct GroupPushResult {
    pub failures: Vec<(i64, GateError)>,
}

impl GroupPushResult {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

impl std::fmt::Display for GroupPushResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "ok");
        }
        write!(f, "failed for uids: ")?;
        for (i, (uid, err)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{uid}={err}")?;
        }
        Ok(())
    }
}

impl TcpServer {
    pub fn new(config: ServerConfig, service: Arc<dyn Service>, pool: Arc<SlabPool>, log: Logger) -> TcpServer {
        let registry = Arc::new(Registry::new(
            config.registry_shard_count,
            config.registry_capacity_hint,
        ));
        let stopper = Arc::new(Stopper::new(config.stop_timeout));

        TcpServer {
            config,
            registry,
            service,
            pool,
            next_wid: AtomicU64::new(1),
            stopper,
            log,
            after_connect: None,
            after_disconnect: None,
        }
    }

    pub fn with_connect_hooks(mut self, after_connect: ConnectHook, after_disconnect: ConnectHook) -> TcpServer {
        self.after_connect = Some(after_connect);
        self.after_disconnect = Some(after_disconnect);
        self
    }

    pub fn registry(&self) -> &Arc<Registry<Worker>> {
        &self.registry
    }

    /// Binds the configured address and runs acceptor tasks until [`Self::stop`] is called.
    /// Resolves once every acceptor task has exited.
    pub async fn serve(self: &Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(GateError::from)?;
        let listener = Arc::new(listener);

        slog::info!(self.log, "listening"; "addr" => &self.config.bind_addr, "acceptors" => self.config.acceptor_count);

        let mut acceptors = Vec::with_capacity(self.config.acceptor_count);
        for _ in 0..self.config.acceptor_count {
            let server = self.clone();
            let listener = listener.clone();
            acceptors.push(tokio::spawn(async move { server.accept_loop(listener).await }));
        }

        for handle in acceptors {
            let _ = handle.await;
        }

        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: Arc<TcpListener>) {
        loop {
            tokio::select! {
                _ = self.stopper.stop_triggered() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => self.clone().handle_accept(stream),
                        Err(e) => {
                            slog::warn!(self.log, "accept failed"; "err" => %e);
                        }
                    }
                }
            }
        }
    }

    fn handle_accept(self: Arc<Self>, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            slog::warn!(self.log, "set_nodelay failed"; "err" => %e);
        }
        self.apply_socket_opts(&stream);

        tokio::spawn(async move {
            if let Err(e) = self.serve_one(stream).await {
                slog::debug!(self.log, "connection rejected"; "err" => %e);
            }
        });
    }

    /// Applies `KeepAlive`/`ReadBuffer`/`WriteBuffer` from config to one accepted socket.
    /// Mirrors `pkg/net/server.go`'s per-connection `SetKeepAlive`/`SetReadBuffer`/
    /// `SetWriteBuffer` calls ahead of handing the socket to a worker.
    fn apply_socket_opts(&self, stream: &TcpStream) {
        let sock = socket2::SockRef::from(stream);
        if let Err(e) = sock.set_keepalive(self.config.keepalive) {
            slog::warn!(self.log, "set_keepalive failed"; "err" => %e);
        }
        if let Some(size) = self.config.read_buffer_size {
            if let Err(e) = sock.set_recv_buffer_size(size) {
                slog::warn!(self.log, "set_recv_buffer_size failed"; "err" => %e);
            }
        }
        if let Some(size) = self.config.write_buffer_size {
            if let Err(e) = sock.set_send_buffer_size(size) {
                slog::warn!(self.log, "set_send_buffer_size failed"; "err" => %e);
            }
        }
    }

    /// Runs one accepted connection end to end: construct, handshake, register, run, then clean
    /// up. Mirrors `pkg/net/server.go`'s per-connection goroutine body.
    async fn serve_one(self: Arc<Self>, stream: TcpStream) -> Result<()> {
        let wid = self.next_wid.fetch_add(1, Ordering::Relaxed);
        let worker = Arc::new(Worker::new(
            wid,
            stream,
            self.config.worker.clone(),
            self.service.clone(),
            self.pool.clone(),
            self.log.clone(),
        )?);

        let start_result = worker.start().await;
        if let Err(e) = start_result {
            worker.stop().await;
            return Err(e);
        }

        if let Some(replaced) = self.registry.put(worker.clone()) {
            replaced.trigger_stop();
        }

        let (color, uid) = worker.color_uid();
        if let Some(hook) = &self.after_connect {
            hook(color, uid);
        }

        worker.clone().run().await;

        worker.stop().await;
        self.registry.del(&worker);

        let (color, uid) = worker.color_uid();
        if let Some(hook) = &self.after_disconnect {
            hook(color, uid);
        }

        Ok(())
    }

    /// Pushes `pack` to a single connected uid.
    pub async fn push(&self, uid: i64, pack: Vec<u8>) -> Result<()> {
        let worker = self
            .registry
            .get_by_uid(uid)
            .ok_or(GateError::NotFound("worker not found"))?;
        worker.push(pack).await
    }

    /// Pushes `pack` to every uid in `uids`, best-effort. Returns every per-uid failure, including
    /// for uids that aren't currently connected.
    pub async fn push_group(&self, uids: &[i64], pack: Vec<u8>) -> GroupPushResult {
        let mut result = GroupPushResult::default();
        for &uid in uids {
            match self.registry.get_by_uid(uid) {
                Some(worker) => {
                    if let Err(e) = worker.push(pack.clone()).await {
                        result.failures.push((uid, e));
                    }
                }
                None => result.failures.push((uid, GateError::NotFound("worker not found"))),
            }
        }
        result
    }

    /// Pushes `pack` to every currently connected worker, best-effort.
    pub async fn broadcast(&self, pack: Vec<u8>) -> GroupPushResult {
        let mut targets = Vec::new();
        self.registry.walk(|w| {
            targets.push(w.clone());
            true
        });

        let mut result = GroupPushResult::default();
        for worker in targets {
            if let Err(e) = worker.push(pack.clone()).await {
                let uid = worker.color_uid().1;
                result.failures.push((uid, e));
            }
        }
        result
    }

    /// Triggers every registered worker to stop, then waits for each to finish. Idempotent with
    /// respect to the server's own stop-once semantics: a second call just waits.
    pub async fn stop(&self) {
        self.stopper
            .do_stop(async {
                let mut targets = Vec::new();
                self.registry.walk(|w| {
                    targets.push(w.clone());
                    true
                });
                for worker in &targets {
                    worker.trigger_stop();
                }
                for worker in &targets {
                    worker.wait_stopped().await;
                }
            })
            .await;
    }
}

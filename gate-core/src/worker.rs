use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use slog::Logger;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::buffer::{FramedReader, SlabPool};
use crate::crypto::aes_cbc;
use crate::error::{GateError, Result};
use crate::middleware;
use crate::protocol::{self, Packet};
use crate::registry::WorkerHandle;
use crate::service::Service;
use crate::session::Session;
use crate::stopper::{CountdownStopper, Stopper};
use crate::tunnel::{Pusher, Tunnel, TunnelHolder, WorkerControl};

/// Tunables governing a single connection's lifecycle. Defaults mirror SPEC_FULL.md §5/§4.E.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub handshake_timeout: Duration,
    pub request_idle_timeout: Duration,
    pub wait_main_tunnel_timeout: Duration,
    pub stop_timeout: Duration,
    pub reply_channel_size: usize,
    pub read_buffer_initial_size: usize,
    /// Gates the per-packet request/reply middleware logging (see `middleware::log_request`).
    /// Matches the teacher's dev/prod profile split: verbose per-packet logs are a development
    /// aid, never a production default.
    pub dev_profile: bool,
}

impl Default for WorkerConfig {
    fn default() -> WorkerConfig {
        WorkerConfig {
            handshake_timeout: Duration::from_secs(10),
            request_idle_timeout: Duration::from_secs(60),
            wait_main_tunnel_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(3),
            reply_channel_size: 1024,
            read_buffer_initial_size: 4096,
            dev_profile: false,
        }
    }
}

/// One accepted connection's whole state machine: handshake, read/write/tick loops, tunnel
/// holder, stop coordination. States: New -> Handshaking (`start`) -> Running (`run`) ->
/// Stopping/Stopped (`stop`, idempotent).
///
/// Grounded on `pkg/net/internal/worker.go`'s `worker` struct and its `Start`/`Run`/`Stop`
/// methods.
pub struct Worker {
    wid: u64,
    peer_addr: String,
    session: RwLock<Arc<Session>>,
    reply_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    reply_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    reader: Mutex<Option<FramedReader<OwnedReadHalf>>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    tunnels: TunnelHolder,
    stopper: Arc<Stopper>,
    countdown: CountdownStopper,
    config: WorkerConfig,
    service: Arc<dyn Service>,
    log: Logger,
    started: AtomicBool,
}

impl Worker {
    pub fn new(
        wid: u64,
        stream: TcpStream,
        config: WorkerConfig,
        service: Arc<dyn Service>,
        pool: Arc<SlabPool>,
        log: Logger,
    ) -> io::Result<Worker> {
        let peer_addr = stream.peer_addr()?.ip().to_string();
        let (read_half, write_half) = stream.into_split();
        let reader = FramedReader::new(read_half, pool, config.read_buffer_initial_size);
        let (reply_tx, reply_rx) = mpsc::channel(config.reply_channel_size);
        let stopper = Arc::new(Stopper::new(config.stop_timeout));

        Ok(Worker {
            wid,
            peer_addr,
            session: RwLock::new(Arc::new(Session::default_session())),
            reply_tx: Mutex::new(Some(reply_tx)),
            reply_rx: Mutex::new(Some(reply_rx)),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(write_half)),
            tunnels: TunnelHolder::new(),
            stopper,
            countdown: CountdownStopper::new(),
            config,
            service,
            log,
            started: AtomicBool::new(false),
        })
    }

    pub fn wid(&self) -> u64 {
        self.wid
    }

    pub fn session(&self) -> Arc<Session> {
        self.session.read().clone()
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn color_uid(&self) -> (String, i64) {
        let session = self.session.read();
        (session.color().to_string(), session.uid())
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

    /// Handshake step: reads one framed packet, authenticates it via the plugged-in service,
    /// writes the reply, and installs the resulting session. Any failure aborts start; the
    /// caller must still invoke [`Self::stop`] to release the connection's resources.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut reader = self
            .reader
            .lock()
            .take()
            .ok_or(GateError::Protocol("worker already started"))?;

        let handshake_result = timeout(self.config.handshake_timeout, protocol::read_frame(&mut reader))
            .await
            .map_err(|_| GateError::Protocol("handshake timed out"));
        *self.reader.lock() = Some(reader);
        let body = handshake_result??;

        let (reply, session) = self.service.auth(&body).await?;

        let mut writer = self
            .writer
            .lock()
            .take()
            .ok_or(GateError::Protocol("worker already started"))?;
        let write_result = timeout(
            self.config.handshake_timeout,
            protocol::write_frame(&mut writer, &reply),
        )
        .await
        .map_err(|_| GateError::Protocol("handshake reply timed out"));
        *self.writer.lock() = Some(writer);
        write_result??;

        session.set_client_ip(self.peer_addr.clone());
        *self.session.write() = session.clone();

        self.service.on_connected(&session).await;
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Runs the four cooperating tasks (stop-wait, read, write, tick) to completion. Returns
    /// once the worker is done accepting new work; the caller is still responsible for calling
    /// [`Self::stop`] afterwards to release connection resources and run `on_disconnect`.
    pub async fn run(self: Arc<Self>) {
        let reader = match self.reader.lock().take() {
            Some(r) => r,
            None => return,
        };
        let writer = match self.writer.lock().take() {
            Some(w) => w,
            None => return,
        };
        let reply_rx = match self.reply_rx.lock().take() {
            Some(rx) => rx,
            None => return,
        };

        let log = middleware::connection_logger(&self.log, self.wid, &self.peer_addr);

        let stop_task = {
            let this = self.clone();
            tokio::spawn(async move {
                this.stopper.stop_triggered().await;
            })
        };
        let read_task = tokio::spawn(self.clone().read_loop(reader, log.clone()));
        let write_task = tokio::spawn(self.clone().write_loop(reply_rx, writer, log.clone()));
        let tick_task = tokio::spawn(self.clone().tick_loop());

        let _ = tokio::join!(stop_task, read_task, write_task, tick_task);
    }

    async fn read_loop(self: Arc<Self>, mut reader: FramedReader<OwnedReadHalf>, log: Logger) {
        loop {
            tokio::select! {
                _ = self.stopper.stop_triggered() => break,
                result = self.read_pack(&mut reader, &log) => {
                    if let Err(e) = result {
                        slog::debug!(log, "read loop ending"; "err" => %e);
                        self.trigger_stop();
                        break;
                    }
                }
            }
        }
        let _ = reader.close();
    }

    async fn write_loop(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<Vec<u8>>,
        mut writer: OwnedWriteHalf,
        log: Logger,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = self.stopper.stop_triggered(), if !rx.is_closed() => {
                    rx.close();
                }
                msg = rx.recv() => {
                    match msg {
                        Some(pack) => {
                            if self.config.dev_profile {
                                if let Ok(packet) = Packet::decode(&pack) {
                                    middleware::log_reply(&log, &packet, true);
                                }
                            }
                            if let Err(e) = self.write_pack(&mut writer, pack).await {
                                slog::debug!(log, "write loop ending"; "err" => %e);
                                self.trigger_stop();
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }

    async fn tick_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = self.stopper.stop_triggered() => break,
                _ = interval.tick() => {
                    if self.countdown.is_expired(SystemTime::now()) {
                        self.trigger_stop();
                        break;
                    }
                }
            }
        }
    }

    /// Idempotent worker teardown: runs `on_disconnect` (if the handshake ever completed),
    /// closes the reply path, and stops every tunnel this worker holds.
    pub async fn stop(self: &Arc<Self>) {
        let this = self.clone();
        self.stopper
            .do_stop(async move {
                if this.started.load(Ordering::SeqCst) {
                    let session = this.session.read().clone();
                    let _ = timeout(Duration::from_secs(2), this.service.on_disconnect(&session)).await;
                }
                *this.reply_tx.lock() = None;
                this.tunnels.stop();
            })
            .await;
    }

    /// Enqueues `pack` for delivery to the client. Rejects once stopping or on an empty payload.
    pub async fn push(&self, pack: Vec<u8>) -> Result<()> {
        if self.stopper.is_stopping() {
            return Err(GateError::Stopping("worker is stopping"));
        }
        if pack.is_empty() {
            return Err(GateError::EmptyPayload);
        }

        let tx = self.reply_tx.lock().clone();
        let tx = tx.ok_or(GateError::Stopping("worker is stopping"))?;
        tx.send(pack)
            .await
            .map_err(|_| GateError::Stopping("reply channel closed"))
    }

    /// Returns the live tunnel for `(module, oid)`, creating it via the plugged-in service if
    /// none exists yet.
    pub async fn tunnel(self: &Arc<Self>, module: i32, oid: i64) -> Result<Arc<Tunnel>> {
        let tp = self.service.tunnel_type(module);
        if let Some(t) = self.tunnels.get(tp, oid) {
            return Ok(t);
        }

        let service = self.service.clone();
        let worker = self.clone();
        self.tunnels
            .get_or_create(tp, oid, move || async move { service.create_tunnel(tp, oid, &worker).await })
            .await
    }

    async fn read_pack(
        self: &Arc<Self>,
        reader: &mut FramedReader<OwnedReadHalf>,
        log: &Logger,
    ) -> Result<()> {
        let body = timeout(self.config.request_idle_timeout, self.read_raw(reader))
            .await
            .map_err(|_| GateError::Io(io::ErrorKind::TimedOut))??;

        let packet = Packet::decode(&body)?;
        middleware::log_request(log, &packet, self.config.dev_profile);

        let session = self.session.read().clone();
        self.service.handle(&session, self, packet).await
    }

    async fn read_raw(&self, reader: &mut FramedReader<OwnedReadHalf>) -> Result<Vec<u8>> {
        let body = protocol::read_frame(reader).await?;
        let session = self.session.read().clone();
        if session.is_crypto() {
            let aes = session
                .aes()
                .ok_or(GateError::Crypto("session has no aes key"))?;
            aes_cbc::decrypt(aes, &body)
        } else {
            Ok(body)
        }
    }

    async fn write_pack(&self, writer: &mut OwnedWriteHalf, pack: Vec<u8>) -> Result<()> {
        let session = self.session.read().clone();
        let body = if session.is_crypto() {
            let aes = session
                .aes()
                .ok_or(GateError::Crypto("session has no aes key"))?;
            aes_cbc::encrypt(aes, &pack)?
        } else {
            pack
        };
        protocol::write_frame(writer, &body).await
    }
}

impl WorkerHandle for Worker {
    fn wid(&self) -> u64 {
        self.wid
    }

    fn uid(&self) -> i64 {
        self.session.read().uid()
    }
}

impl WorkerControl for Worker {
    fn reset_stop_countdown(&self) {
        self.countdown.reset();
    }

    fn set_stop_countdown_time(&self, now: SystemTime) {
        self.countdown.set_expiry_time(now + self.config.wait_main_tunnel_timeout);
    }
}

#[async_trait]
impl Pusher for Worker {
    async fn push(&self, pack: Vec<u8>) -> Result<()> {
        // Calls the inherent method above, not this trait method: an inherent impl always wins
        // method resolution over a trait impl of the same name on the same type.
        self.push(pack).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendStream, ChannelBackendStream, Message};
    use crate::crypto::AesKey;
    use crate::tunnel::{PlayerTunnel, TunnelType};
    use crate::routetable::InMemoryRouteTable;
    use slog::Discard;
    use tokio::net::TcpListener;

    fn test_logger() -> Logger {
        Logger::root(Discard, slog::o!())
    }

    fn test_pool() -> Arc<SlabPool> {
        Arc::new(SlabPool::new(64, 65536, 4).unwrap())
    }

    /// A minimal `Service` that authenticates any non-empty handshake body, echoing it back as
    /// the reply, and always forwards client packets through a player tunnel backed by a fresh
    /// in-process backend stream pair. Crypto is disabled.
    struct EchoService {
        backend_other_side: Mutex<Option<ChannelBackendStream>>,
    }

    impl EchoService {
        fn new() -> Arc<EchoService> {
            Arc::new(EchoService {
                backend_other_side: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Service for EchoService {
        async fn auth(&self, body: &[u8]) -> Result<(Vec<u8>, Arc<Session>)> {
            let session = Arc::new(Session::new(1, 1, 0, None, false, "blue".into(), 0));
            Ok((body.to_vec(), session))
        }

        fn tunnel_type(&self, _module: i32) -> TunnelType {
            TunnelType::Player
        }

        async fn create_tunnel(&self, _tp: TunnelType, _oid: i64, worker: &Arc<Worker>) -> Result<Arc<Tunnel>> {
            let (mine, theirs) = ChannelBackendStream::pair();
            *self.backend_other_side.lock() = Some(theirs);
            let app = Arc::new(PlayerTunnel::new(
                worker.session(),
                worker.clone(),
                Arc::new(InMemoryRouteTable::new()),
                Arc::new(mine),
            ));
            Ok(Tunnel::spawn(app, worker.clone(), worker.log().clone()))
        }

        async fn on_connected(&self, _session: &Arc<Session>) {}
        async fn on_disconnect(&self, _session: &Arc<Session>) {}

        async fn handle(&self, _session: &Arc<Session>, worker: &Arc<Worker>, packet: Packet) -> Result<()> {
            let t = worker.tunnel(packet.module, packet.obj).await?;
            t.forward(&packet).await
        }
    }

    async fn handshake_roundtrip(stream: &mut TcpStream, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        crate::protocol::write_frame(&mut buf, body).await.unwrap();
        use tokio::io::AsyncWriteExt;
        stream.write_all(&buf).await.unwrap();

        use byteorder::{BigEndian, ByteOrder};
        use tokio::io::AsyncReadExt;
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let len = BigEndian::read_u32(&len_buf) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        body
    }

    #[tokio::test]
    async fn start_performs_handshake_and_installs_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let reply = handshake_roundtrip(&mut stream, b"hello").await;
            (stream, reply)
        });

        let (server_stream, _) = listener.accept().await.unwrap();
        let worker = Arc::new(
            Worker::new(
                1,
                server_stream,
                WorkerConfig::default(),
                EchoService::new(),
                test_pool(),
                test_logger(),
            )
            .unwrap(),
        );
        worker.start().await.unwrap();

        let (_client_stream, reply) = client.await.unwrap();
        assert_eq!(reply, b"hello");
        assert_eq!(worker.session().uid(), 1);
    }

    #[tokio::test]
    async fn push_fails_once_stopping() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            handshake_roundtrip(&mut stream, b"hi").await;
            stream
        });

        let (server_stream, _) = listener.accept().await.unwrap();
        let worker = Arc::new(
            Worker::new(
                1,
                server_stream,
                WorkerConfig::default(),
                EchoService::new(),
                test_pool(),
                test_logger(),
            )
            .unwrap(),
        );
        worker.start().await.unwrap();
        let _client_stream = client.await.unwrap();

        worker.trigger_stop();
        let err = worker.push(vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, GateError::Stopping(_)));
    }

    #[tokio::test]
    async fn push_rejects_empty_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            handshake_roundtrip(&mut stream, b"hi").await;
            stream
        });

        let (server_stream, _) = listener.accept().await.unwrap();
        let worker = Arc::new(
            Worker::new(
                1,
                server_stream,
                WorkerConfig::default(),
                EchoService::new(),
                test_pool(),
                test_logger(),
            )
            .unwrap(),
        );
        worker.start().await.unwrap();
        let _client_stream = client.await.unwrap();

        let err = worker.push(vec![]).await.unwrap_err();
        assert!(matches!(err, GateError::EmptyPayload));
    }

    #[tokio::test]
    async fn run_forwards_client_packets_through_a_tunnel_and_pushes_replies() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            handshake_roundtrip(&mut stream, b"hi").await;

            let packet = Packet::new(0, 5, 1, vec![9, 9, 9]);
            let body = packet.encode().unwrap();
            let mut wire = Vec::new();
            crate::protocol::write_frame(&mut wire, &body).await.unwrap();
            use tokio::io::AsyncWriteExt;
            stream.write_all(&wire).await.unwrap();

            use byteorder::{BigEndian, ByteOrder};
            use tokio::io::AsyncReadExt;
            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).await.unwrap();
            let len = BigEndian::read_u32(&len_buf) as usize;
            let mut reply_body = vec![0u8; len];
            stream.read_exact(&mut reply_body).await.unwrap();
            Packet::decode(&reply_body).unwrap()
        });

        let (server_stream, _) = listener.accept().await.unwrap();
        let service = EchoService::new();
        let worker = Arc::new(
            Worker::new(
                1,
                server_stream,
                WorkerConfig::default(),
                service.clone(),
                test_pool(),
                test_logger(),
            )
            .unwrap(),
        );
        worker.start().await.unwrap();

        let run_worker = worker.clone();
        let run_task = tokio::spawn(async move { run_worker.run().await });

        // Wait for the player tunnel to exist, then reply on its backend stream.
        let backend = loop {
            if let Some(b) = service.backend_other_side.lock().take() {
                break b;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        let cs_msg = backend.recv().await.unwrap();
        assert_eq!(cs_msg.obj, 1);
        assert_eq!(cs_msg.data, vec![9, 9, 9]);

        backend
            .send(Message {
                module: 0,
                seq: 6,
                obj: 1,
                data: vec![7, 7],
                data_version: 0,
            })
            .await
            .unwrap();

        let reply = client_task.await.unwrap();
        assert_eq!(reply.data, vec![7, 7]);

        worker.trigger_stop();
        worker.stop().await;
        run_task.await.unwrap();
    }

    /// A `Service` whose session has crypto turned on with a known, fixed key, so the test can
    /// encrypt/decrypt on the client side by hand.
    struct CryptoEchoService {
        aes: AesKey,
    }

    #[async_trait]
    impl Service for CryptoEchoService {
        async fn auth(&self, body: &[u8]) -> Result<(Vec<u8>, Arc<Session>)> {
            let session = Arc::new(Session::new(1, 1, 0, Some(self.aes.clone()), true, "blue".into(), 0));
            Ok((body.to_vec(), session))
        }

        fn tunnel_type(&self, _module: i32) -> TunnelType {
            TunnelType::Player
        }

        async fn create_tunnel(&self, _tp: TunnelType, _oid: i64, _worker: &Arc<Worker>) -> Result<Arc<Tunnel>> {
            Err(GateError::Protocol("not used in this test"))
        }

        async fn on_connected(&self, _session: &Arc<Session>) {}
        async fn on_disconnect(&self, _session: &Arc<Session>) {}

        async fn handle(&self, _session: &Arc<Session>, worker: &Arc<Worker>, packet: Packet) -> Result<()> {
            worker.push(packet.encode()?).await
        }
    }

    #[tokio::test]
    async fn crypto_enabled_session_encrypts_pushes_and_decrypts_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let aes = AesKey::generate();
        let client_aes = aes.clone();

        let client_task = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            handshake_roundtrip(&mut stream, b"hi").await;

            let packet = Packet::new(0, 5, 1, vec![1, 2, 3]);
            let plain = packet.encode().unwrap();
            let cipher = aes_cbc::encrypt(&client_aes, &plain).unwrap();
            let mut wire = Vec::new();
            crate::protocol::write_frame(&mut wire, &cipher).await.unwrap();
            use tokio::io::AsyncWriteExt;
            stream.write_all(&wire).await.unwrap();

            use byteorder::{BigEndian, ByteOrder};
            use tokio::io::AsyncReadExt;
            let mut len_buf = [0u8; 4];
            stream.read_exact(&mut len_buf).await.unwrap();
            let len = BigEndian::read_u32(&len_buf) as usize;
            let mut reply_cipher = vec![0u8; len];
            stream.read_exact(&mut reply_cipher).await.unwrap();
            let reply_plain = aes_cbc::decrypt(&client_aes, &reply_cipher).unwrap();
            Packet::decode(&reply_plain).unwrap()
        });

        let (server_stream, _) = listener.accept().await.unwrap();
        let worker = Arc::new(
            Worker::new(
                1,
                server_stream,
                WorkerConfig::default(),
                Arc::new(CryptoEchoService { aes }),
                test_pool(),
                test_logger(),
            )
            .unwrap(),
        );
        worker.start().await.unwrap();
        assert!(worker.session().is_crypto());

        let run_worker = worker.clone();
        let run_task = tokio::spawn(async move { run_worker.run().await });

        let reply = client_task.await.unwrap();
        assert_eq!(reply.data, vec![1, 2, 3]);

        worker.trigger_stop();
        worker.stop().await;
        run_task.await.unwrap();
    }
}

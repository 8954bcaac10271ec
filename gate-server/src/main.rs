mod config;
mod demo_backend;
mod health;
mod logging;
mod service;

use std::sync::Arc;

use clap::Parser;

use gate_core::buffer::SlabPool;
use gate_core::crypto::rsa_handshake::RsaHandshakeKey;
use gate_core::crypto::token_aes::{TokenAesKey, TOKEN_KEY_SIZE};
use gate_core::routetable::InMemoryRouteTable;
use gate_core::secrets;
use gate_core::server::{ServerConfig, TcpServer};

use config::GateConfig;
use health::Health;
use service::GateService;

const SLAB_MIN_BUF_SIZE: usize = 64;
const SLAB_MAX_BUF_SIZE: usize = 64 * 1024;
const SLAB_SIZE_FACTOR: usize = 8;

/// Gateway process: bridges a TCP client population to application backends over the tunnel
/// multiplexer defined in `gate-core`. See SPEC_FULL.md §6.
///
/// Grounded on `services/authenticator/src/main.rs`'s flag-parsing shape, rebuilt against clap's
/// derive API rather than the teacher's older builder-style `App::new()`.
#[derive(Parser, Debug)]
#[command(name = "gate-server", about = "Realtime gateway core")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long = "conf", default_value = "gate.toml")]
    conf: String,
}

fn load_rsa_key(secret: &config::Secret) -> RsaHandshakeKey {
    if secret.private_key.is_empty() {
        let mut rng = rand::thread_rng();
        let private = rsa::RsaPrivateKey::new(&mut rng, 2048).expect("rsa keygen failed");
        use rsa::pkcs8::EncodePrivateKey;
        let der = private.to_pkcs8_der().expect("rsa der encode failed");
        use base64::Engine;
        let b64 = base64::engine::general_purpose::URL_SAFE.encode(der.as_bytes());
        RsaHandshakeKey::from_base64_pkcs8(&b64).expect("generated rsa key did not parse")
    } else {
        RsaHandshakeKey::from_base64_pkcs8(&secret.private_key).expect("configured rsa private key is invalid")
    }
}

fn load_token_key(secret: &config::Secret) -> TokenAesKey {
    if secret.aes_key.is_empty() {
        TokenAesKey::new([0u8; TOKEN_KEY_SIZE])
    } else {
        use base64::Engine;
        let raw = base64::engine::general_purpose::URL_SAFE
            .decode(&secret.aes_key)
            .expect("configured aes_key is not valid base64");
        TokenAesKey::from_slice(&raw).expect("configured aes_key has the wrong length")
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = GateConfig::load(&cli.conf);

    let log = logging::init(&config.log);
    slog::info!(log, "starting gate-server"; "bind_addr" => &config.server.bind_addr, "color" => &config.label.color);

    let rsa_key = load_rsa_key(&config.secret);
    let token_key = load_token_key(&config.secret);
    secrets::init(rsa_key, token_key.clone(), config.secret.crypto_enabled);

    let health = Health::new();

    let mut server_config = ServerConfig::new(config.server.bind_addr.clone());
    if let Some(n) = config.server.acceptor_count {
        server_config.acceptor_count = n;
    }
    server_config.registry_shard_count = config.bucket.shard_count;
    server_config.registry_capacity_hint = config.bucket.capacity_hint;
    server_config.stop_timeout = config.stop_timeout();
    server_config.keepalive = config.server.keepalive;
    server_config.read_buffer_size = config.server.read_buffer_size;
    server_config.write_buffer_size = config.server.write_buffer_size;
    server_config.worker.handshake_timeout = config.handshake_timeout();
    server_config.worker.request_idle_timeout = config.request_idle_timeout();
    server_config.worker.wait_main_tunnel_timeout = config.wait_main_tunnel_timeout();
    server_config.worker.stop_timeout = config.stop_timeout();
    server_config.worker.reply_channel_size = config.server.reply_channel_size;
    server_config.worker.dev_profile = config.label.is_dev_profile();

    let route_table = Arc::new(InMemoryRouteTable::new());
    let service = Arc::new(GateService::new(token_key, route_table.clone(), log.clone()));
    let pool = Arc::new(
        SlabPool::new(SLAB_MIN_BUF_SIZE, SLAB_MAX_BUF_SIZE, SLAB_SIZE_FACTOR)
            .expect("invalid slab pool geometry"),
    );

    let gate_endpoint = config.server.bind_addr.clone();
    let route_log = log.clone();
    let after_connect = {
        let route_table = route_table.clone();
        let gate_endpoint = gate_endpoint.clone();
        let route_log = route_log.clone();
        Arc::new(move |color: String, uid: i64| {
            let route_table = route_table.clone();
            let gate_endpoint = gate_endpoint.clone();
            let route_log = route_log.clone();
            tokio::spawn(async move {
                if let Err(e) = route_table.get_set(&color, uid, gate_endpoint).await {
                    slog::warn!(route_log, "route table registration failed"; "err" => %e, "uid" => uid);
                }
            });
        })
    };
    let after_disconnect = {
        let route_table = route_table.clone();
        let gate_endpoint = gate_endpoint.clone();
        Arc::new(move |color: String, uid: i64| {
            let route_table = route_table.clone();
            let gate_endpoint = gate_endpoint.clone();
            tokio::spawn(async move {
                let _ = route_table.del_if_same(&color, uid, &gate_endpoint).await;
            });
        })
    };

    let server = Arc::new(
        TcpServer::new(server_config, service, pool, log.clone())
            .with_connect_hooks(after_connect, after_disconnect),
    );

    health.mark_ready();

    let serve_server = server.clone();
    let serve_task = tokio::spawn(async move { serve_server.serve().await });

    tokio::select! {
        result = serve_task => {
            health.mark_not_ready();
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    slog::crit!(log, "server exited"; "err" => %e);
                    std::process::exit(1);
                }
                Err(e) => slog::crit!(log, "server task panicked"; "err" => %e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            slog::info!(log, "shutdown signal received");
            health.mark_not_ready();
            server.stop().await;
        }
    }
}

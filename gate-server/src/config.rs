use std::path::Path;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

/// Default TCP bind address when nothing else is configured.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:7900";

/// `label` bootstrap section: process identity metadata attached to every log line and, where
/// meaningful, every request-scoped context (see SPEC_FULL.md §6 CLI/config).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Label {
    pub service: String,
    pub version: String,
    /// Blue/green deployment tag; propagated onto every session at handshake time.
    pub color: String,
    /// `"dev"` or `"prod"`; gates verbose per-packet request/reply logging.
    pub profile: String,
    pub language: String,
    pub node: String,
    pub zone: String,
}

impl Default for Label {
    fn default() -> Label {
        Label {
            service: "gate".into(),
            version: "0.1.0".into(),
            color: "blue".into(),
            profile: "dev".into(),
            language: "en".into(),
            node: "node-1".into(),
            zone: "local".into(),
        }
    }
}

impl Label {
    pub fn is_dev_profile(&self) -> bool {
        self.profile == "dev"
    }
}

/// `server` bootstrap section.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Server {
    pub bind_addr: String,
    pub acceptor_count: Option<usize>,
    pub handshake_timeout_secs: u64,
    pub request_idle_timeout_secs: u64,
    pub wait_main_tunnel_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub reply_channel_size: usize,
    /// `SO_KEEPALIVE` applied to every accepted socket.
    pub keepalive: bool,
    /// `SO_RCVBUF` applied to every accepted socket, if set.
    pub read_buffer_size: Option<usize>,
    /// `SO_SNDBUF` applied to every accepted socket, if set.
    pub write_buffer_size: Option<usize>,
}

impl Default for Server {
    fn default() -> Server {
        Server {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            acceptor_count: None,
            handshake_timeout_secs: 10,
            request_idle_timeout_secs: 60,
            wait_main_tunnel_timeout_secs: 30,
            stop_timeout_secs: 30,
            reply_channel_size: 1024,
            keepalive: true,
            read_buffer_size: None,
            write_buffer_size: None,
        }
    }
}

/// `bucket` bootstrap section: the connection registry's shard layout.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Bucket {
    pub shard_count: u32,
    pub capacity_hint: usize,
}

impl Default for Bucket {
    fn default() -> Bucket {
        Bucket {
            shard_count: 32,
            capacity_hint: 1024,
        }
    }
}

/// `secret` bootstrap section: process-wide crypto material (see SPEC_FULL.md §4.G).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Secret {
    /// Base64-encoded PKCS8 RSA private key used to decrypt the handshake frame.
    pub private_key: String,
    /// 16 raw bytes, base64 encoded, used to decrypt auth tokens.
    pub aes_key: String,
    /// Whether body/handshake crypto is turned on system-wide; local demos typically run with
    /// this off so a plain TCP client can drive the gateway without an RSA keypair on hand.
    pub crypto_enabled: bool,
}

impl Default for Secret {
    fn default() -> Secret {
        Secret {
            private_key: String::new(),
            aes_key: String::new(),
            crypto_enabled: false,
        }
    }
}

/// `log` bootstrap section.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Log {
    /// `"trace" | "debug" | "info" | "warning" | "error" | "critical"`, per `sloggers::Severity`.
    pub level: String,
    /// `"terminal"` or `"json"`.
    pub sink: String,
}

impl Default for Log {
    fn default() -> Log {
        Log {
            level: "debug".into(),
            sink: "terminal".into(),
        }
    }
}

/// Top level configuration, loaded via [`GateConfig::load`] and overlaid with environment
/// variables in [`GateConfig::apply_env_overlay`].
///
/// Grounded on `game/core/src/config.rs`'s `GameConfig`: a `Default` impl plus a `load`
/// associated function backed by `serdeconv::from_toml_file`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct GateConfig {
    pub label: Label,
    pub server: Server,
    pub bucket: Bucket,
    pub secret: Secret,
    pub log: Log,
}

/// Prefix for the environment variable overlay, e.g. `GATE__SERVER__BIND_ADDR`.
const ENV_PREFIX: &str = "GATE";

impl GateConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> GateConfig {
        let mut config: GateConfig =
            serdeconv::from_toml_file(path).expect("error loading gate configuration file");
        config.apply_env_overlay();
        config
    }

    /// Overlays select fields from environment variables, following the teacher's manual
    /// `std::env::var` idiom (no dedicated env-overlay crate is part of this stack). Only the
    /// handful of values an operator is likely to need to override per-deployment without
    /// editing the TOML are wired up; unset variables leave the TOML value untouched.
    pub fn apply_env_overlay(&mut self) {
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}__SERVER__BIND_ADDR")) {
            self.server.bind_addr = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}__LABEL__COLOR")) {
            self.label.color = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}__LABEL__PROFILE")) {
            self.label.profile = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}__SECRET__PRIVATE_KEY")) {
            self.secret.private_key = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}__SECRET__AES_KEY")) {
            self.secret.aes_key = v;
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}__SECRET__CRYPTO_ENABLED")) {
            self.secret.crypto_enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}__LOG__LEVEL")) {
            self.log.level = v;
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.server.handshake_timeout_secs)
    }

    pub fn request_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_idle_timeout_secs)
    }

    pub fn wait_main_tunnel_timeout(&self) -> Duration {
        Duration::from_secs(self.server.wait_main_tunnel_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.server.stop_timeout_secs)
    }
}

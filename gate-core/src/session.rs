use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;

use crate::crypto::AesKey;

/// Monotonic index counter, starting at `start` and incrementing with [`IndexInfo::increase`].
///
/// Grounded on `pkg/net/session.go`'s `indexInfo`/`atomic.Int64` pair.
struct IndexInfo {
    index: AtomicI64,
}

impl IndexInfo {
    fn new(start: i64) -> IndexInfo {
        IndexInfo {
            index: AtomicI64::new(start),
        }
    }

    fn increase(&self) -> i64 {
        self.index.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn load(&self) -> i64 {
        self.index.load(Ordering::SeqCst)
    }
}

/// Per-connection identity, crypto material and CS/SC sequence counters.
///
/// One `Session` is created per successful handshake and lives for the connection's lifetime,
/// shared across the read/write/tunnel tasks behind an `Arc`. See SPEC_FULL.md §4.D.
pub struct Session {
    uid: i64,
    sid: i64,
    color: String,
    status: i64,
    start_time: i64,
    client_ip: RwLock<String>,

    crypto_enabled: bool,
    aes: Option<AesKey>,

    cs_index: IndexInfo,
    sc_index: IndexInfo,
}

impl Session {
    /// A zero-identity, crypto-disabled session used before a handshake completes.
    pub fn default_session() -> Session {
        Session {
            uid: 0,
            sid: 0,
            color: String::new(),
            status: 0,
            start_time: 0,
            client_ip: RwLock::new(String::new()),
            crypto_enabled: false,
            aes: None,
            cs_index: IndexInfo::new(0),
            sc_index: IndexInfo::new(1),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uid: i64,
        sid: i64,
        start_time: i64,
        aes: Option<AesKey>,
        crypto_enabled: bool,
        color: String,
        status: i64,
    ) -> Session {
        Session {
            uid,
            sid,
            color,
            status,
            start_time,
            client_ip: RwLock::new(String::new()),
            crypto_enabled,
            aes,
            cs_index: IndexInfo::new(0),
            sc_index: IndexInfo::new(1),
        }
    }

    pub fn uid(&self) -> i64 {
        self.uid
    }

    pub fn sid(&self) -> i64 {
        self.sid
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn status(&self) -> i64 {
        self.status
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn client_ip(&self) -> String {
        self.client_ip.read().clone()
    }

    pub fn set_client_ip(&self, ip: String) {
        *self.client_ip.write() = ip;
    }

    pub fn is_crypto(&self) -> bool {
        self.crypto_enabled
    }

    pub fn aes(&self) -> Option<&AesKey> {
        self.aes.as_ref()
    }

    pub fn increase_cs_index(&self) -> i64 {
        self.cs_index.increase()
    }

    pub fn cs_index(&self) -> i64 {
        self.cs_index.load()
    }

    pub fn increase_sc_index(&self) -> i64 {
        self.sc_index.increase()
    }

    pub fn sc_index(&self) -> i64 {
        self.sc_index.load()
    }
}

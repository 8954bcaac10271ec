use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;

/// Where a `(color, uid)` pair currently routes to (gateway instance, wid, whatever the value
/// means to the caller). Backed by whatever the deployment's shared cache looks like; this
/// crate only depends on the trait.
///
/// Grounded on `app/gate/internal/client/player`'s `RouteTable` usage in `player/tunnel.go`
/// (`GetSet`/`DelDelay`).
#[async_trait]
pub trait RouteTable: Send + Sync {
    /// Atomically sets `(color, uid) -> value`, returning whatever was there before (if any).
    async fn get_set(&self, color: &str, uid: i64, value: String) -> Result<Option<String>>;

    /// Deletes `(color, uid)` only if its current value still equals `value`.
    async fn del_if_same(&self, color: &str, uid: i64, value: &str) -> Result<()>;

    /// Deletes `(color, uid)` after `delay` elapses, regardless of what it holds by then.
    async fn del_delay(&self, color: &str, uid: i64, delay: Duration) -> Result<()>;
}

/// Default grace period before a disconnected player's route entry is reclaimed, giving a
/// reconnect a chance to find the same gateway. Mirrors `router.HolderCacheTimeout`.
pub const HOLDER_CACHE_TIMEOUT: Duration = Duration::from_secs(30);

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-memory `RouteTable`, standing in for the distributed cache a real deployment would use.
pub struct InMemoryRouteTable {
    entries: Mutex<HashMap<(String, i64), Entry>>,
}

impl InMemoryRouteTable {
    pub fn new() -> InMemoryRouteTable {
        InMemoryRouteTable {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(color: &str, uid: i64) -> (String, i64) {
        (color.to_string(), uid)
    }

    fn sweep_expired(entries: &mut HashMap<(String, i64), Entry>) {
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at.is_none_or(|at| at > now));
    }
}

impl Default for InMemoryRouteTable {
    fn default() -> Self {
        InMemoryRouteTable::new()
    }
}

#[async_trait]
impl RouteTable for InMemoryRouteTable {
    async fn get_set(&self, color: &str, uid: i64, value: String) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        Self::sweep_expired(&mut entries);
        let old = entries.insert(
            Self::key(color, uid),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(old.map(|e| e.value))
    }

    async fn del_if_same(&self, color: &str, uid: i64, value: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        let key = Self::key(color, uid);
        if entries.get(&key).is_some_and(|e| e.value == value) {
            entries.remove(&key);
        }
        Ok(())
    }

    async fn del_delay(&self, color: &str, uid: i64, delay: Duration) -> Result<()> {
        let mut entries = self.entries.lock();
        let key = Self::key(color, uid);
        if let Some(e) = entries.get_mut(&key) {
            e.expires_at = Some(Instant::now() + delay);
        }
        Ok(())
    }
}

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;

use super::app::TunnelType;
use super::runtime::Tunnel;

/// `TunnelType -> oid -> Tunnel` map owned by a worker, with double-checked-locking creation.
///
/// Grounded on `pkg/net/internal/tunnel.go`'s `tunnelHolder`. The Go version holds a single
/// mutex across the whole creation call (including the backend RPC dial); here the tunnel
/// (and whatever backend stream it needs) is built with no lock held, and the write lock is
/// only taken to publish it, re-checking for a concurrent winner.
pub struct TunnelHolder {
    groups: RwLock<HashMap<TunnelType, HashMap<i64, Arc<Tunnel>>>>,
}

impl TunnelHolder {
    pub fn new() -> TunnelHolder {
        TunnelHolder {
            groups: RwLock::new(HashMap::with_capacity(16)),
        }
    }

    /// Returns the tunnel for `(tp, oid)` if one is registered and not already stopping.
    pub fn get(&self, tp: TunnelType, oid: i64) -> Option<Arc<Tunnel>> {
        let groups = self.groups.read();
        groups
            .get(&tp)?
            .get(&oid)
            .filter(|t| !t.is_stopping())
            .cloned()
    }

    /// Returns the existing tunnel for `(tp, oid)`, or builds one via `create` and publishes it.
    /// If another caller wins the race, the loser's freshly built tunnel is stopped immediately.
    pub async fn get_or_create<F, Fut>(&self, tp: TunnelType, oid: i64, create: F) -> Result<Arc<Tunnel>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<Tunnel>>>,
    {
        if let Some(existing) = self.get(tp, oid) {
            return Ok(existing);
        }

        let created = create().await?;

        let winner = {
            let mut groups = self.groups.write();
            let group = groups.entry(tp).or_insert_with(HashMap::new);
            match group.get(&oid) {
                Some(existing) if !existing.is_stopping() => existing.clone(),
                _ => {
                    group.insert(oid, created.clone());
                    created.clone()
                }
            }
        };

        if !Arc::ptr_eq(&winner, &created) {
            created.trigger_stop();
        }
        Ok(winner)
    }

    /// Triggers stop on every tunnel this worker holds. Called from the worker's own stop path.
    pub fn stop(&self) {
        let groups = self.groups.read();
        for group in groups.values() {
            for tunnel in group.values() {
                tunnel.trigger_stop();
            }
        }
    }
}

impl Default for TunnelHolder {
    fn default() -> Self {
        TunnelHolder::new()
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

/// Minimal contract a registered connection handle must satisfy.
///
/// Kept separate from the concrete `Worker` type so this module can be unit tested in isolation
/// and so `worker.rs` can depend on `registry.rs` rather than the other way around.
pub trait WorkerHandle: Send + Sync {
    fn wid(&self) -> u64;
    fn uid(&self) -> i64;
}

/// Sharded, concurrent `wid -> Worker` registry with a process-wide `uid -> wid` index.
///
/// Grounded on `pkg/net/internal/buckets.go`'s `Buckets`/`Bucket`: `N` shards keyed by
/// `wid % N`, each behind its own `RwLock`, so unrelated connections don't contend on the same
/// lock. The `uid -> wid` side index uses `dashmap` in place of Go's `sync.Map`, per
/// SPEC_FULL.md §10's concurrent-map note.
pub struct Registry<W: WorkerHandle> {
    shards: Vec<RwLock<HashMap<u64, Arc<W>>>>,
    shard_count: u64,
    uid_wid: DashMap<i64, u64>,
}

impl<W: WorkerHandle> Registry<W> {
    pub fn new(shard_count: u32, worker_capacity_hint: usize) -> Registry<W> {
        let shard_count = shard_count.max(1) as u64;
        let shards = (0..shard_count)
            .map(|_| RwLock::new(HashMap::with_capacity(worker_capacity_hint)))
            .collect();

        Registry {
            shards,
            shard_count,
            uid_wid: DashMap::new(),
        }
    }

    fn shard_for(&self, wid: u64) -> &RwLock<HashMap<u64, Arc<W>>> {
        &self.shards[(wid % self.shard_count) as usize]
    }

    /// Inserts `worker`, returning whatever was previously registered under the same wid.
    pub fn put(&self, worker: Arc<W>) -> Option<Arc<W>> {
        let wid = worker.wid();
        let uid = worker.uid();
        let old = self.shard_for(wid).write().insert(wid, worker);
        self.uid_wid.insert(uid, wid);
        old
    }

    /// Removes `worker` only if it is still the one registered under its wid (compare-by-wid,
    /// mirroring the Go `del(dw)` identity check via pointer equality on `Arc`).
    pub fn del(&self, worker: &Arc<W>) {
        let wid = worker.wid();
        let mut shard = self.shard_for(wid).write();
        if let Some(current) = shard.get(&wid) {
            if Arc::ptr_eq(current, worker) {
                shard.remove(&wid);
                self.uid_wid.remove(&worker.uid());
            }
        }
    }

    pub fn get_by_wid(&self, wid: u64) -> Option<Arc<W>> {
        self.shard_for(wid).read().get(&wid).cloned()
    }

    pub fn get_by_uid(&self, uid: i64) -> Option<Arc<W>> {
        let wid = *self.uid_wid.get(&uid)?;
        self.get_by_wid(wid)
    }

    pub fn get_by_uids(&self, uids: &[i64]) -> Vec<Arc<W>> {
        uids.iter().filter_map(|uid| self.get_by_uid(*uid)).collect()
    }

    /// Visits every registered worker, stopping early if `f` returns `false`. Takes a
    /// per-shard snapshot before iterating so callers may freely mutate the registry from `f`.
    pub fn walk<F: FnMut(&Arc<W>) -> bool>(&self, mut f: F) {
        for shard in &self.shards {
            let snapshot: Vec<Arc<W>> = shard.read().values().cloned().collect();
            for worker in &snapshot {
                if !f(worker) {
                    return;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeWorker {
        wid: u64,
        uid: i64,
    }

    impl WorkerHandle for FakeWorker {
        fn wid(&self) -> u64 {
            self.wid
        }
        fn uid(&self) -> i64 {
            self.uid
        }
    }

    #[test]
    fn put_and_get_roundtrip() {
        let reg: Registry<FakeWorker> = Registry::new(4, 8);
        let w = Arc::new(FakeWorker { wid: 10, uid: 100 });
        reg.put(w.clone());

        assert!(reg.get_by_wid(10).is_some());
        assert!(reg.get_by_uid(100).is_some());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn del_only_removes_matching_identity() {
        let reg: Registry<FakeWorker> = Registry::new(4, 8);
        let w1 = Arc::new(FakeWorker { wid: 10, uid: 100 });
        let w2 = Arc::new(FakeWorker { wid: 10, uid: 200 });

        reg.put(w1.clone());
        reg.put(w2.clone());
        // w2 now occupies wid=10; deleting w1 (stale) must be a no-op
        reg.del(&w1);
        assert!(reg.get_by_wid(10).is_some());

        reg.del(&w2);
        assert!(reg.get_by_wid(10).is_none());
        assert!(reg.get_by_uid(200).is_none());
    }

    #[test]
    fn walk_visits_all_shards() {
        let reg: Registry<FakeWorker> = Registry::new(4, 8);
        for i in 0..20u64 {
            reg.put(Arc::new(FakeWorker {
                wid: i,
                uid: i as i64,
            }));
        }

        let mut seen = 0;
        reg.walk(|_| {
            seen += 1;
            true
        });
        assert_eq!(seen, 20);
    }

    #[test]
    fn walk_can_stop_early() {
        let reg: Registry<FakeWorker> = Registry::new(4, 8);
        for i in 0..20u64 {
            reg.put(Arc::new(FakeWorker {
                wid: i,
                uid: i as i64,
            }));
        }

        let mut seen = 0;
        reg.walk(|_| {
            seen += 1;
            seen < 5
        });
        assert_eq!(seen, 5);
    }

    #[test]
    fn get_by_uids_skips_unknown() {
        let reg: Registry<FakeWorker> = Registry::new(4, 8);
        reg.put(Arc::new(FakeWorker { wid: 1, uid: 1 }));
        let found = reg.get_by_uids(&[1, 2, 3]);
        assert_eq!(found.len(), 1);
    }
}

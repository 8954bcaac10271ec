use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Minimal liveness surface: a single ready/not-ready flag flipped once the TCP listener is
/// bound, per SPEC_FULL.md §6. A full `/health`/`/metrics`/`/q/*` HTTP surface is explicitly out
/// of scope (it belongs to the ambient transport framework this crate does not carry), but the
/// hook point is named here so a real deployment can wire an HTTP endpoint straight to it.
#[derive(Clone, Default)]
pub struct Health {
    ready: Arc<AtomicBool>,
}

impl Health {
    pub fn new() -> Health {
        Health {
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

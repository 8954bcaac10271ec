use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// One-shot stop coordinator: the first caller to reach [`Stopper::do_stop`] runs the cleanup
/// closure under a timeout; every other caller (and anyone awaiting [`Stopper::wait_stopped`])
/// just waits for it to finish.
///
/// Grounded on `pkg/net/internal/worker.go`'s use of `sync.Stoppable`/`DoStop`, reimplemented
/// here since the upstream `vulcan-pkg-tool/sync` package isn't part of this crate's dependency
/// stack; `tokio_util::sync::CancellationToken` stands in for the trigger channel.
pub struct Stopper {
    token: CancellationToken,
    stop_timeout: Duration,
    ran: AtomicBool,
    done: AtomicBool,
    done_notify: Notify,
}

impl Stopper {
    pub fn new(stop_timeout: Duration) -> Stopper {
        Stopper {
            token: CancellationToken::new(),
            stop_timeout,
            ran: AtomicBool::new(false),
            done: AtomicBool::new(false),
            done_notify: Notify::new(),
        }
    }

    /// Signals stop intent without blocking on cleanup. Idempotent.
    pub fn trigger_stop(&self) {
        self.token.cancel();
    }

    /// Resolves once [`Self::trigger_stop`] (directly or via [`Self::do_stop`]) has been called.
    pub async fn stop_triggered(&self) {
        self.token.cancelled().await;
    }

    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Runs `body` exactly once, bounded by the configured stop timeout. A slow `body` does not
    /// hold up stop completion forever: other callers are released once the timeout elapses.
    pub async fn do_stop<F>(&self, body: F)
    where
        F: Future<Output = ()>,
    {
        if self.ran.swap(true, Ordering::SeqCst) {
            self.wait_stopped().await;
            return;
        }

        self.trigger_stop();
        let _ = tokio::time::timeout(self.stop_timeout, body).await;
        self.done.store(true, Ordering::SeqCst);
        self.done_notify.notify_waiters();
    }

    /// Blocks until a [`Self::do_stop`] call (by any caller) has completed.
    pub async fn wait_stopped(&self) {
        let notified = self.done_notify.notified();
        if self.done.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

/// Deadline that, once set, causes a worker to shut down if not reset or extended in time.
///
/// Grounded on `worker.go`'s `SetStopCountDownTime`/`tickStopSign`: when a player's main tunnel
/// disconnects, the worker gets a grace period to reconnect before the gateway tears it down.
pub struct CountdownStopper {
    expiry: Mutex<Option<SystemTime>>,
}

impl CountdownStopper {
    pub fn new() -> CountdownStopper {
        CountdownStopper {
            expiry: Mutex::new(None),
        }
    }

    pub fn set_expiry_time(&self, at: SystemTime) {
        *self.expiry.lock() = Some(at);
    }

    pub fn expiry_time(&self) -> Option<SystemTime> {
        *self.expiry.lock()
    }

    pub fn reset(&self) {
        *self.expiry.lock() = None;
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expiry_time().is_some_and(|t| now > t)
    }
}

impl Default for CountdownStopper {
    fn default() -> Self {
        CountdownStopper::new()
    }
}

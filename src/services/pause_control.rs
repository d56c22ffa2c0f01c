//! Pause Control: a level-triggered cooperative gate (spec.md §4.3).
//!
//! Multiple independent pause sources compose additively via a reference
//! count — scheduling resumes only once every source has released its
//! pause, mirroring the teacher's escalation/merge-conflict dual-gate
//! pattern (`swarm_orchestrator`'s pause/resume bookkeeping).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    sources: AtomicI64,
    notify: Notify,
}

/// Cloneable handle onto one shared pause gate.
#[derive(Debug, Clone, Default)]
pub struct PauseControl(Arc<Inner>);

impl PauseControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag. Each call must be matched by exactly one
    /// [`resume`](Self::resume) for scheduling to proceed again.
    pub fn pause(&self) {
        self.0.sources.fetch_add(1, Ordering::SeqCst);
    }

    /// Lowers one pause source. If this was the last active source, wakes
    /// every waiter.
    pub fn resume(&self) {
        let previous = self.0.sources.fetch_sub(1, Ordering::SeqCst);
        if previous <= 1 {
            self.0.sources.store(0, Ordering::SeqCst);
            self.0.notify.notify_waiters();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.0.sources.load(Ordering::SeqCst) > 0
    }

    /// Blocks until every pause source has released, or until `cancel`
    /// resolves (context cancellation per spec.md §5).
    pub async fn wait_if_paused(&self, cancel: impl std::future::Future<Output = ()>) {
        tokio::pin!(cancel);
        loop {
            // Register the waiter before checking `is_paused`, and `enable`
            // it so it's armed as of this point. Otherwise a `resume()` on
            // another task between the check and `notified()` would land in
            // the gap and `notify_waiters` wouldn't persist a permit for us.
            let notified = self.0.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_paused() {
                return;
            }

            tokio::select! {
                () = &mut notified => {}
                () = &mut cancel => return,
            }
        }
    }
}

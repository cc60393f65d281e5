use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use ulid::Ulid;

/// Cancellable reference to one armed timer.
///
/// Cancelling before the delay elapses guarantees the work never starts.
/// Work that has already started runs to completion; callers that need
/// stronger guarantees compare `id()` against their stored handle under
/// their own lock before acting.
#[derive(Debug)]
pub struct TimerHandle {
    id: Ulid,
    token: CancellationToken,
}

impl TimerHandle {
    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Process-wide delayed-work scheduler backed by the tokio timer.
#[derive(Debug, Default)]
pub struct Scheduler {
    pending: Arc<AtomicUsize>,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run `work(id)` after `delay` unless cancelled first. Must be called inside a tokio runtime.
    pub fn schedule<F, Fut>(&self, delay: Duration, work: F) -> TimerHandle
    where
        F: FnOnce(Ulid) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = Ulid::new();
        let token = CancellationToken::new();
        let child = token.clone();
        let pending = self.pending.clone();
        pending.fetch_add(1, Ordering::AcqRel);

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = child.cancelled() => {
                    debug!("timer {id} cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    metrics::counter!(crate::observability::TIMERS_FIRED_TOTAL).increment(1);
                    work(id).await;
                }
            }
            pending.fetch_sub(1, Ordering::AcqRel);
        });

        TimerHandle { id, token }
    }

    /// Timers armed and not yet finished or observed cancelled.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

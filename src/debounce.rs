use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

struct Pending {
    id: u64,
    token: CancellationToken,
}

/// Coalesces bursts of calls into one delayed run per key.
///
/// Each key holds at most one pending task. Scheduling on a key cancels
/// whatever was pending there, so only the last call of a burst runs, once
/// `delay` has passed without another call.
#[derive(Clone, Default)]
pub struct Debouncer {
    pending: Arc<DashMap<String, Pending>>,
    next_id: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps `f` into a handle whose `call` is debounced on `key`.
    pub fn debounce<F, Fut>(&self, key: &str, f: F, delay: Duration) -> Debounced<F>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Debounced {
            debouncer: self.clone(),
            key: key.to_string(),
            delay,
            f,
        }
    }

    /// Runs `task` after `delay` unless another schedule or a cancel on the
    /// same key happens first. `task` is not polled before the delay expires.
    pub fn schedule<Fut>(&self, key: &str, delay: Duration, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::error!("debounce on {key} outside of a tokio runtime, dropping task");
            return;
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Some(previous) = self.pending.insert(
            key.to_string(),
            Pending {
                id,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        let pending = Arc::clone(&self.pending);
        let key = key.to_string();
        handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    pending.remove_if(&key, |_, p| p.id == id);
                    task.await;
                }
            }
        });
    }

    /// Drops the pending task for `key` without running it.
    pub fn cancel(&self, key: &str) {
        if let Some((_, pending)) = self.pending.remove(key) {
            pending.token.cancel();
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }
}

/// A debounced callable bound to one key.
pub struct Debounced<F> {
    debouncer: Debouncer,
    key: String,
    delay: Duration,
    f: F,
}

impl<F, Fut> Debounced<F>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn call(&self) {
        self.debouncer.schedule(&self.key, self.delay, (self.f)());
    }

    pub fn cancel(&self) {
        self.debouncer.cancel(&self.key);
    }
}

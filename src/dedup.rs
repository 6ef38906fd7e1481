use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::SearchResult;

struct InFlight<T> {
    id: u64,
    future: Shared<BoxFuture<'static, SearchResult<T>>>,
}

/// Collapses concurrent identical requests into one.
///
/// The first caller for a key starts the producer; everyone else arriving
/// while it runs awaits the same shared future and gets a clone of its result,
/// error included. The entry is removed as soon as the result is in.
pub struct RequestDeduplicator<T> {
    in_flight: DashMap<String, InFlight<T>>,
    next_id: AtomicU64,
}

impl<T> Default for RequestDeduplicator<T> {
    fn default() -> Self {
        Self {
            in_flight: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn deduplicate<F, Fut>(&self, key: &str, producer: F) -> SearchResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SearchResult<T>> + Send + 'static,
    {
        let (id, future) = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                log::debug!("joining in-flight request for {key}");
                (entry.get().id, entry.get().future.clone())
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let future = producer().boxed().shared();
                entry.insert(InFlight {
                    id,
                    future: future.clone(),
                });
                (id, future)
            }
        };

        let result = future.await;
        // A cancel followed by a fresh request may have replaced the entry.
        self.in_flight.remove_if(key, |_, entry| entry.id == id);
        result
    }

    /// Forgets the in-flight entry for `key`. The underlying call keeps
    /// running for whoever already awaits it; new callers start over.
    pub fn cancel(&self, key: &str) {
        self.in_flight.remove(key);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_call() {
        let dedup = RequestDeduplicator::<Vec<String>>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let producer = || {
            let calls = Arc::clone(&calls);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(vec!["shoe".to_string()])
            }
        };

        let (a, b, c) = tokio::join!(
            dedup.deduplicate("shoe|en", producer()),
            dedup.deduplicate("shoe|en", producer()),
            dedup.deduplicate("shoe|en", producer()),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), vec!["shoe".to_string()]);
        assert_eq!(b.unwrap(), c.unwrap());
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_shared_and_then_cleared() {
        let dedup = RequestDeduplicator::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = || {
            let calls = Arc::clone(&calls);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(SearchError::backend("boom"))
            }
        };

        let (a, b) = tokio::join!(
            dedup.deduplicate("k", failing()),
            dedup.deduplicate("k", failing())
        );
        assert_eq!(a, Err(SearchError::backend("boom")));
        assert_eq!(b, Err(SearchError::backend("boom")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Settled entries are gone, so the next call runs the producer again.
        let again = dedup.deduplicate("k", || async { Ok(7) }).await;
        assert_eq!(again, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_do_not_share() {
        let dedup = RequestDeduplicator::<&'static str>::new();
        let (a, b) = tokio::join!(
            dedup.deduplicate("a", || async { Ok("a") }),
            dedup.deduplicate("b", || async { Ok("b") })
        );
        assert_eq!(a, Ok("a"));
        assert_eq!(b, Ok("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_detaches_future_callers() {
        let dedup = Arc::new(RequestDeduplicator::<u32>::new());
        let slow = {
            let dedup = Arc::clone(&dedup);
            tokio::spawn(async move {
                dedup
                    .deduplicate("k", || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(dedup.in_flight(), 1);

        dedup.cancel("k");
        let fresh = dedup.deduplicate("k", || async { Ok(2) }).await;
        assert_eq!(fresh, Ok(2));
        assert_eq!(slow.await.unwrap(), Ok(1));
    }
}

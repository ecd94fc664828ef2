//! Short-TTL directory listing cache with in-flight deduplication.

use crate::error::Result;
use crate::types::RemoteEntry;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_TTL: Duration = Duration::from_secs(2);

type Listing = Arc<Vec<RemoteEntry>>;
type InFlight = Shared<BoxFuture<'static, Result<Listing>>>;

enum CacheSlot {
    Ready { listing: Listing, stored_at: Instant },
    InFlight(InFlight),
}

/// Listing cache keyed by (token, path). Concurrent lists of the same key
/// share one request; fresh results are served for a short TTL.
pub struct DirectoryCache {
    ttl: Duration,
    slots: Mutex<HashMap<(String, String), CacheSlot>>,
}

impl Default for DirectoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl DirectoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// List through the cache. `fetch` runs at most once per key while a
    /// request is in flight or a fresh entry exists; `force` bypasses a
    /// fresh entry but still joins an in-flight request.
    pub async fn list<F, Fut>(
        &self,
        token: &str,
        path: &str,
        force: bool,
        fetch: F,
    ) -> Result<Listing>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<RemoteEntry>>> + Send + 'static,
    {
        let key = (token.to_string(), path.to_string());
        let task: InFlight = {
            let mut slots = self.slots.lock().expect("dircache lock");
            match slots.get(&key) {
                Some(CacheSlot::Ready { listing, stored_at })
                    if !force && stored_at.elapsed() < self.ttl =>
                {
                    return Ok(Arc::clone(listing));
                }
                Some(CacheSlot::InFlight(task)) => task.clone(),
                _ => {
                    let task: InFlight = fetch()
                        .map(|result| result.map(Arc::new))
                        .boxed()
                        .shared();
                    slots.insert(key.clone(), CacheSlot::InFlight(task.clone()));
                    task
                }
            }
        };

        let result = task.clone().await;
        let mut slots = self.slots.lock().expect("dircache lock");
        match &result {
            Ok(listing) => {
                // Only the request that owns the slot stores the result.
                if let Some(CacheSlot::InFlight(current)) = slots.get(&key) {
                    if current.ptr_eq(&task) {
                        slots.insert(
                            key,
                            CacheSlot::Ready {
                                listing: Arc::clone(listing),
                                stored_at: Instant::now(),
                            },
                        );
                    }
                }
            }
            Err(_) => {
                if let Some(CacheSlot::InFlight(current)) = slots.get(&key) {
                    if current.ptr_eq(&task) {
                        slots.remove(&key);
                    }
                }
            }
        }
        result
    }

    /// Drop every entry for one token. Called on any write, mkdir, or delete.
    pub fn invalidate_token(&self, token: &str) {
        self.slots
            .lock()
            .expect("dircache lock")
            .retain(|(cached_token, _), _| cached_token != token);
    }

    /// Drop everything. Called when the session token changes.
    pub fn invalidate_all(&self) {
        self.slots.lock().expect("dircache lock").clear();
    }
}

//! Single-flight cache in front of an expensive keyed fetch.
//!
//! For a given key at most one fetch is in flight at any instant. The first
//! caller to miss becomes the leader and performs the fetch; callers arriving
//! meanwhile wait for the leader to finish, then look at the cache again.
//! Successful results are cached for a fixed TTL. Failures are never cached:
//! after a failed fetch the next caller becomes the new leader.
//!
//! "Check pending, check cache, become leader" is one decision taken under a
//! single lock, so two callers can never both lead for the same key.
//!
//! Expired entries are swept on insertion, at most once per TTL, so the map
//! holds no more than two TTLs' worth of distinct keys.

use crate::context::CallContext;
use crate::errors::AuthnError;
use crate::observability::metrics::{self, CacheResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

struct State<V> {
    cache: HashMap<String, CacheEntry<V>>,
    /// Keys with a fetch in flight. The sender lives in the leader's guard.
    pending: HashMap<String, watch::Receiver<bool>>,
    next_sweep: Instant,
}

enum Decision<V> {
    Hit(V),
    Wait(watch::Receiver<bool>),
    Lead(watch::Sender<bool>),
}

/// Keyed single-flight cache.
pub struct RequestCoalescer<V> {
    state: Mutex<State<V>>,
    ttl: Duration,
}

impl<V> std::fmt::Debug for RequestCoalescer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("RequestCoalescer")
            .field("ttl", &self.ttl)
            .field("cached", &state.cache.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl<V: Clone + Send + Sync> RequestCoalescer<V> {
    /// A coalescer caching successful results for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                cache: HashMap::new(),
                pending: HashMap::new(),
                next_sweep: Instant::now() + ttl,
            }),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `key`, or fetch it.
    ///
    /// Only the leader runs `fetch`, under `ctx`. Followers wait under their
    /// own `ctx`; a follower giving up does not disturb the leader, and a
    /// leader giving up frees the key for a new leader.
    ///
    /// # Errors
    ///
    /// The leader's fetch error (not cached), or `Cancelled` /
    /// `DeadlineExceeded` from `ctx`.
    pub async fn get_or_fetch<F, Fut>(&self, ctx: &CallContext, key: &str, fetch: F) -> Result<V, AuthnError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, AuthnError>>,
    {
        let mut waited = false;

        let done = loop {
            match self.decide(key) {
                Decision::Hit(value) => {
                    let result = if waited {
                        CacheResult::Coalesced
                    } else {
                        CacheResult::Hit
                    };
                    metrics::record_cache_lookup(result);
                    tracing::trace!(target: "authn.coalescer", ?result, "Served from cache");
                    return Ok(value);
                }
                Decision::Wait(mut pending) => {
                    waited = true;
                    tracing::trace!(target: "authn.coalescer", "Waiting for in-flight fetch");
                    ctx.run(async move {
                        loop {
                            if *pending.borrow_and_update() {
                                break;
                            }
                            if pending.changed().await.is_err() {
                                break;
                            }
                        }
                    })
                    .await?;
                }
                Decision::Lead(done) => break done,
            }
        };

        metrics::record_cache_lookup(CacheResult::Miss);
        let _guard = LeaderGuard {
            coalescer: self,
            key,
            done,
        };

        let value = ctx.run(fetch()).await??;
        self.store(key, value.clone());
        Ok(value)
    }

    fn decide(&self, key: &str) -> Decision<V> {
        let mut state = self.lock();

        if let Some(pending) = state.pending.get(key) {
            return Decision::Wait(pending.clone());
        }

        let now = Instant::now();
        if let Some(entry) = state.cache.get(key) {
            if entry.expires_at > now {
                return Decision::Hit(entry.value.clone());
            }
            state.cache.remove(key);
        }

        let (done, pending) = watch::channel(false);
        state.pending.insert(key.to_string(), pending);
        Decision::Lead(done)
    }

    fn store(&self, key: &str, value: V) {
        let now = Instant::now();
        let mut state = self.lock();

        if now >= state.next_sweep {
            let before = state.cache.len();
            state.cache.retain(|_, entry| entry.expires_at > now);
            state.next_sweep = now + self.ttl;
            tracing::trace!(
                target: "authn.coalescer",
                evicted = before - state.cache.len(),
                "Swept expired entries"
            );
        }

        state.cache.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Cached, unexpired value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        self.lock()
            .cache
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    #[must_use]
    pub fn is_cached(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Drop the cached value for `key`, if any.
    pub fn invalidate(&self, key: &str) {
        self.lock().cache.remove(key);
    }

    /// Drop every expired entry; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.cache.len();
        state.cache.retain(|_, entry| entry.expires_at > now);
        before - state.cache.len()
    }

    /// Number of cached entries, expired ones included until swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys with a fetch in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}

impl<V> RequestCoalescer<V> {
    // The state is consistent after every critical section, so a panic in
    // another holder leaves nothing to repair.
    fn lock(&self) -> MutexGuard<'_, State<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the leader's pending marker and wakes followers, whether the
/// fetch succeeded, failed or was dropped mid-flight.
struct LeaderGuard<'a, V> {
    coalescer: &'a RequestCoalescer<V>,
    key: &'a str,
    done: watch::Sender<bool>,
}

impl<V> Drop for LeaderGuard<'_, V> {
    fn drop(&mut self) {
        self.coalescer.lock().pending.remove(self.key);
        self.done.send_replace(true);
    }
}

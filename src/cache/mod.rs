//! Memoization of slowly changing remote reads (event lists, rosters, standings) in process
//! memory and, when available, a persistent key-value slot.

mod entry;

pub use entry::{CacheEntry, CACHE_KEY_PREFIX, CACHE_SCHEMA_VERSION};

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::stores::KeyValueSlot;

use entry::storage_key;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

type SharedFetch = Shared<LocalBoxFuture<'static, Result<Value, QueryCacheError>>>;

/// Runs background revalidations on the current thread.
pub type Spawner = Rc<dyn Fn(LocalBoxFuture<'static, ()>)>;

/// Spawns onto the surrounding tokio [`LocalSet`](tokio::task::LocalSet). Only hand this to a
/// cache that is exclusively used from inside one, spawning from anywhere else panics.
#[cfg(not(target_arch = "wasm32"))]
pub fn local_set_spawner() -> Spawner {
    Rc::new(|task: LocalBoxFuture<'static, ()>| {
        tokio::task::spawn_local(task);
    })
}

/// The browser event loop can always take another task.
#[cfg(target_arch = "wasm32")]
fn default_spawner() -> Option<Spawner> {
    Some(Rc::new(|task: LocalBoxFuture<'static, ()>| {
        wasm_bindgen_futures::spawn_local(task)
    }))
}

/// There is no way to tell whether we're running inside a `LocalSet`, so nothing is spawned
/// unless a spawner is handed in explicitly.
#[cfg(not(target_arch = "wasm32"))]
fn default_spawner() -> Option<Spawner> {
    None
}

/// Whether the current process started from a manual reload. A user hitting reload usually wants
/// fresh data, so every key skips the cache on its first request after one.
pub trait ReloadSignal {
    fn was_reloaded(&self) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoReload;

impl ReloadSignal for NoReload {
    fn was_reloaded(&self) -> bool {
        false
    }
}

/// Memoizes async reads by key.
///
/// Lookups go to memory first, then the persistent slot. Fresh entries are returned as is, stale
/// ones are either served while a background refresh runs or refetched in place depending on
/// [`CacheOptions::stale_while_revalidate`]. Concurrent requests for the same key share a single
/// fetch. Clones share all state.
///
/// Background refreshes need a [`Spawner`]. Browser builds use the page's event loop, native
/// callers opt in with [`QueryCache::with_spawner`] (see [`local_set_spawner`]). Without one a
/// stale entry is refetched in place, falling back to the stale value if that fails.
#[derive(Clone)]
pub struct QueryCache {
    inner: Rc<CacheInner>,
}

impl QueryCache {
    /// The cached value for `key` and whether it is still fresh under `ttl_ms`.
    fn cached_value<T: DeserializeOwned>(&self, key: &str, ttl_ms: i64) -> Option<(bool, T)> {
        let entry = self.inner.lookup(key)?;
        let fresh = entry.is_fresh(self.inner.clock.now_ms(), ttl_ms);

        match serde_json::from_value::<T>(entry.value) {
            Ok(value) => Some((fresh, value)),
            Err(err) => {
                tracing::debug!(key, "discarding cache entry with unexpected shape: {err}");
                self.inner.discard(key);
                None
            }
        }
    }

    fn fetch<T, F, Fut, E>(&self, key: &str, fetcher: F) -> SharedFetch
    where
        T: Serialize + 'static,
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        E: Into<BoxError> + 'static,
    {
        let existing = self.inner.state.borrow().in_flight.get(key).cloned();
        if let Some(in_flight) = existing {
            tracing::debug!(key, "joining in flight fetch");
            return in_flight;
        }

        let inner = self.inner.clone();
        let owned_key = key.to_string();

        let fetch = async move {
            let result = match fetcher().await {
                Ok(value) => serde_json::to_value(value)
                    .map_err(|err| QueryCacheError::Serialization(err.to_string())),
                Err(err) => {
                    let err: BoxError = err.into();
                    Err(QueryCacheError::Fetch(Arc::from(err)))
                }
            };

            if let Ok(value) = &result {
                inner.store(&owned_key, value.clone());
            }

            inner.state.borrow_mut().in_flight.remove(&owned_key);

            result
        }
        .boxed_local()
        .shared();

        self.inner
            .state
            .borrow_mut()
            .in_flight
            .insert(key.to_string(), fetch.clone());

        fetch
    }

    async fn fetch_or_stale<T, F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        stale: Option<T>,
    ) -> Result<T, QueryCacheError>
    where
        T: Serialize + DeserializeOwned + 'static,
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        E: Into<BoxError> + 'static,
    {
        let fetched = self.fetch(key, fetcher).await.and_then(|value| {
            serde_json::from_value(value)
                .map_err(|err| QueryCacheError::Serialization(err.to_string()))
        });

        match (fetched, stale) {
            (Ok(value), _) => Ok(value),
            (Err(err), Some(stale)) => {
                tracing::warn!(key, "fetch failed, serving stale value: {err}");
                Ok(stale)
            }
            (Err(err), None) => Err(err),
        }
    }

    /// Returns the cached value for `key` or runs `fetcher` to produce it, see [`QueryCache`]
    /// for the rules. The only error that reaches the caller is a failed fetch with nothing
    /// cached to fall back on.
    pub async fn get_cached_query<T, F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        options: CacheOptions,
    ) -> Result<T, QueryCacheError>
    where
        T: Serialize + DeserializeOwned + 'static,
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        E: Into<BoxError> + 'static,
    {
        let storage_key = storage_key(key);
        let cached = self.cached_value::<T>(&storage_key, options.ttl_ms);

        if options.force_refresh || self.take_reload_bypass(&storage_key) {
            tracing::debug!(key, "bypassing query cache");
            let stale = cached.map(|(_, value)| value);
            return self.fetch_or_stale(&storage_key, fetcher, stale).await;
        }

        let stale = match cached {
            Some((true, value)) => {
                tracing::trace!(key, "query cache hit");
                return Ok(value);
            }
            Some((false, value)) => {
                if options.stale_while_revalidate {
                    if let Some(spawner) = self.inner.spawner.clone() {
                        tracing::debug!(key, "serving stale value while revalidating");
                        self.revalidate(&spawner, &storage_key, fetcher);
                        return Ok(value);
                    }

                    tracing::debug!(key, "no background spawner, revalidating in place");
                }

                Some(value)
            }
            None => None,
        };

        tracing::debug!(key, "query cache miss");
        self.fetch_or_stale(&storage_key, fetcher, stale).await
    }

    pub fn invalidate_cached_query(&self, key: &str) {
        self.inner.discard(&storage_key(key));
    }

    /// Drops every entry whose key starts with `prefix` from both tiers.
    pub fn invalidate_cached_queries(&self, prefix: &str) {
        let prefix = storage_key(prefix);

        self.inner
            .state
            .borrow_mut()
            .entries
            .retain(|key, _| !key.starts_with(&prefix));

        let Some(slot) = &self.inner.slot else {
            return;
        };

        let keys = match slot.keys() {
            Ok(keys) => keys,
            Err(err) => {
                tracing::warn!("unable to list persisted cache entries: {err}");
                return;
            }
        };

        for key in keys.iter().filter(|key| key.starts_with(&prefix)) {
            if let Err(err) = slot.remove_item(key) {
                tracing::warn!(key = %key, "failed to remove persisted cache entry: {err}");
            }
        }
    }

    pub fn is_fetching(&self, key: &str) -> bool {
        self.inner
            .state
            .borrow()
            .in_flight
            .contains_key(&storage_key(key))
    }

    pub fn memory_only() -> Self {
        Self::with_parts(None, SystemClock, &NoReload)
    }

    pub fn new(slot: impl KeyValueSlot + 'static) -> Self {
        Self::with_parts(Some(Rc::new(slot)), SystemClock, &NoReload)
    }

    fn revalidate<T, F, Fut, E>(&self, spawner: &Spawner, key: &str, fetcher: F)
    where
        T: Serialize + 'static,
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        E: Into<BoxError> + 'static,
    {
        let fetch = self.fetch(key, fetcher);
        let key = key.to_string();

        spawner(
            async move {
                if let Err(err) = fetch.await {
                    tracing::warn!(key = %key, "background revalidation failed: {err}");
                }
            }
            .boxed_local(),
        );
    }

    fn take_reload_bypass(&self, key: &str) -> bool {
        if !self.inner.reloaded {
            return false;
        }

        self.inner
            .state
            .borrow_mut()
            .reload_refreshed
            .insert(key.to_string())
    }

    /// Resolves once the fetch currently running for `key` (if any) has settled.
    pub async fn wait_for_fetch(&self, key: &str) {
        let in_flight = self
            .inner
            .state
            .borrow()
            .in_flight
            .get(&storage_key(key))
            .cloned();

        if let Some(fetch) = in_flight {
            let _ = fetch.await;
        }
    }

    /// The reload signal is consulted once here and never again for the lifetime of the cache.
    pub fn with_parts(
        slot: Option<Rc<dyn KeyValueSlot>>,
        clock: impl Clock + 'static,
        reload: &dyn ReloadSignal,
    ) -> Self {
        let reloaded = reload.was_reloaded();
        if reloaded {
            tracing::debug!("page was reloaded, cached queries will be refreshed on first use");
        }

        let inner = CacheInner {
            clock: Rc::new(clock),
            reloaded,
            slot,
            spawner: default_spawner(),
            state: RefCell::new(CacheState::default()),
        };

        Self {
            inner: Rc::new(inner),
        }
    }

    /// Replaces how background revalidations are run. Has to be called before the cache is
    /// cloned, clones share the spawner they were created with.
    pub fn with_spawner(self, spawner: Spawner) -> Self {
        let inner = match Rc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => {
                tracing::warn!("query cache already shared, keeping its current spawner");
                return Self { inner: shared };
            }
        };

        Self {
            inner: Rc::new(CacheInner {
                spawner: Some(spawner),
                ..inner
            }),
        }
    }
}

struct CacheInner {
    clock: Rc<dyn Clock>,
    reloaded: bool,
    slot: Option<Rc<dyn KeyValueSlot>>,
    spawner: Option<Spawner>,
    state: RefCell<CacheState>,
}

impl CacheInner {
    fn discard(&self, key: &str) {
        self.state.borrow_mut().entries.remove(key);

        if let Some(slot) = &self.slot {
            if let Err(err) = slot.remove_item(key) {
                tracing::warn!(key = %key, "failed to remove persisted cache entry: {err}");
            }
        }
    }

    fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let in_memory = self.state.borrow().entries.get(key).cloned();
        if in_memory.is_some() {
            return in_memory;
        }

        let slot = self.slot.as_ref()?;
        let raw = match slot.get_item(key) {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::debug!(key, "persistent cache tier unreadable: {err}");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => {
                self.state
                    .borrow_mut()
                    .entries
                    .insert(key.to_string(), entry.clone());
                Some(entry)
            }
            Err(err) => {
                tracing::debug!(key, "discarding corrupt persisted cache entry: {err}");
                self.discard(key);
                None
            }
        }
    }

    fn store(&self, key: &str, value: Value) {
        let entry = CacheEntry {
            value,
            updated_at: self.clock.now_ms(),
        };

        if let Some(slot) = &self.slot {
            match serde_json::to_string(&entry) {
                Ok(raw) => {
                    if let Err(err) = slot.set_item(key, &raw) {
                        tracing::warn!(key, "failed to persist cache entry: {err}");
                    }
                }
                Err(err) => tracing::warn!(key, "failed to encode cache entry: {err}"),
            }
        }

        self.state
            .borrow_mut()
            .entries
            .insert(key.to_string(), entry);
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, SharedFetch>,
    reload_refreshed: HashSet<String>,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum QueryCacheError {
    #[error("query fetch failed: {0}")]
    Fetch(Arc<dyn std::error::Error + Send + Sync>),

    #[error("query result couldn't be (de)serialized: {0}")]
    Serialization(String),
}

use std::rc::Rc;

use async_trait::async_trait;
use js_sys::{Function, Promise, Reflect};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

// Consumer of the normal API, nothing in here is re-exported through the prelude
use crate::prelude::*;

use crate::wasm::connectivity::NavigatorConnectivity;
use crate::wasm::reload::browser_query_cache;

/// Backend writes supplied by the UI layer as JS functions. Each receives the payload object and
/// may return a promise. A rejection carrying a truthy `permanent` property is treated as a
/// permanent failure, any other rejection as transient.
pub(crate) struct JsMatchWriter {
    append_match_log: Function,
    set_match_score: Function,
}

#[async_trait(?Send)]
impl MatchWriter for JsMatchWriter {
    async fn append_match_log(&self, entry: &MatchLogEntry) -> Result<(), RemoteWriteError> {
        invoke(&self.append_match_log, entry).await
    }

    async fn set_match_score(&self, update: &ScoreUpdate) -> Result<(), RemoteWriteError> {
        invoke(&self.set_match_score, update).await
    }
}

async fn invoke<T: Serialize>(callback: &Function, payload: &T) -> Result<(), RemoteWriteError> {
    let payload = to_js(payload).map_err(|err| RemoteWriteError::permanent(err.to_string()))?;

    let returned = callback
        .call1(&JsValue::NULL, &payload)
        .map_err(rejection)?;

    if let Some(promise) = returned.dyn_ref::<Promise>() {
        JsFuture::from(promise.clone()).await.map_err(rejection)?;
    }

    Ok(())
}

fn rejection(err: JsValue) -> RemoteWriteError {
    let permanent = Reflect::get(&err, &JsValue::from_str("permanent"))
        .map(|flag| flag.is_truthy())
        .unwrap_or(false);

    let message = js_error_message(&err);

    if permanent {
        RemoteWriteError::permanent(message)
    } else {
        RemoteWriteError::transient(message)
    }
}

fn js_error_message(err: &JsValue) -> String {
    err.dyn_ref::<js_sys::Error>()
        .map(|error| String::from(error.message()))
        .or_else(|| err.as_string())
        .unwrap_or_else(|| format!("{err:?}"))
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, serde_wasm_bindgen::Error> {
    value.serialize(&serde_wasm_bindgen::Serializer::json_compatible())
}

#[wasm_bindgen(js_name = OfflineQueue)]
pub struct WasmOfflineQueue {
    drainer: Rc<QueueDrainer<LazyQueueStore, JsMatchWriter>>,
}

#[wasm_bindgen(js_class = OfflineQueue)]
impl WasmOfflineQueue {
    #[wasm_bindgen(js_name = activeBackend)]
    pub async fn active_backend(&self) -> String {
        self.drainer.queue().store().active_backend().await.to_string()
    }

    pub async fn drain(&self) -> ScorekeeperResult<JsValue> {
        let report = self.drainer.drain().await;
        Ok(to_js(&report)?)
    }

    #[wasm_bindgen(js_name = enqueueMatchLogEntry)]
    pub async fn enqueue_match_log_entry(
        &self,
        entry: JsValue,
        id: Option<String>,
    ) -> ScorekeeperResult<JsValue> {
        let entry: MatchLogEntry = serde_wasm_bindgen::from_value(entry)?;
        let options = EnqueueOptions {
            id,
            created_at: None,
        };

        let item = self
            .drainer
            .queue()
            .enqueue_match_log_entry(entry, options)
            .await?;

        Ok(to_js(&item)?)
    }

    #[wasm_bindgen(js_name = listOfflineQueue)]
    pub async fn list_offline_queue(&self) -> ScorekeeperResult<JsValue> {
        let items = self.drainer.queue().list_offline_queue().await?;
        Ok(to_js(&items)?)
    }

    #[wasm_bindgen(constructor)]
    pub fn new(append_match_log: Function, set_match_score: Function) -> Self {
        let store = LazyQueueStore::new(crate::stores::default_openers());
        let writer = JsMatchWriter {
            append_match_log,
            set_match_score,
        };

        let drainer = QueueDrainer::new(OfflineQueue::new(store), writer, NavigatorConnectivity);

        Self {
            drainer: Rc::new(drainer),
        }
    }

    #[wasm_bindgen(js_name = pendingCount)]
    pub async fn pending_count(&self) -> ScorekeeperResult<u32> {
        let count = self.drainer.queue().pending_count().await?;
        Ok(count as u32)
    }

    #[wasm_bindgen(js_name = removeOfflineQueueItem)]
    pub async fn remove_offline_queue_item(&self, id: String) -> ScorekeeperResult<()> {
        self.drainer.queue().remove_offline_queue_item(&id).await?;
        Ok(())
    }

    #[wasm_bindgen(js_name = upsertScoreUpdate)]
    pub async fn upsert_score_update(
        &self,
        match_id: String,
        score_a: u32,
        score_b: u32,
        id: Option<String>,
    ) -> ScorekeeperResult<JsValue> {
        let options = EnqueueOptions {
            id,
            created_at: None,
        };

        let item = self
            .drainer
            .queue()
            .upsert_score_update(ScoreUpdate::new(match_id, score_a, score_b), options)
            .await?;

        Ok(to_js(&item)?)
    }

    /// Drains whenever the browser reports coming back online, for the lifetime of the page.
    #[wasm_bindgen(js_name = watchConnectivity)]
    pub fn watch_connectivity(&self) {
        let drainer = self.drainer.clone();
        wasm_bindgen_futures::spawn_local(async move {
            drainer.run_on_reconnect().await;
        });
    }
}

#[wasm_bindgen(js_name = QueryCache)]
pub struct WasmQueryCache {
    cache: QueryCache,
}

#[wasm_bindgen(js_class = QueryCache)]
impl WasmQueryCache {
    /// `fetcher` is called without arguments and may return a promise. Its result has to be JSON
    /// compatible to be cached.
    #[wasm_bindgen(js_name = getCachedQuery)]
    pub async fn get_cached_query(
        &self,
        key: String,
        fetcher: Function,
        ttl_ms: Option<f64>,
        stale_while_revalidate: Option<bool>,
        force_refresh: Option<bool>,
    ) -> ScorekeeperResult<JsValue> {
        let defaults = CacheOptions::default();
        let options = CacheOptions {
            ttl_ms: ttl_ms.map(|ttl| ttl as i64).unwrap_or(defaults.ttl_ms),
            stale_while_revalidate: stale_while_revalidate.unwrap_or(defaults.stale_while_revalidate),
            force_refresh: force_refresh.unwrap_or(defaults.force_refresh),
        };

        let value: serde_json::Value = self
            .cache
            .get_cached_query(&key, move || fetch_json(fetcher), options)
            .await?;

        Ok(to_js(&value)?)
    }

    #[wasm_bindgen(js_name = invalidateCachedQuery)]
    pub fn invalidate_cached_query(&self, key: String) {
        self.cache.invalidate_cached_query(&key);
    }

    #[wasm_bindgen(js_name = invalidateCachedQueries)]
    pub fn invalidate_cached_queries(&self, prefix: String) {
        self.cache.invalidate_cached_queries(&prefix);
    }

    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            cache: browser_query_cache(),
        }
    }
}

impl Default for WasmQueryCache {
    fn default() -> Self {
        Self::new()
    }
}

async fn fetch_json(fetcher: Function) -> Result<serde_json::Value, String> {
    let mut result = fetcher.call0(&JsValue::NULL).map_err(|err| js_error_message(&err))?;

    if let Some(promise) = result.dyn_ref::<Promise>() {
        result = JsFuture::from(promise.clone())
            .await
            .map_err(|err| js_error_message(&err))?;
    }

    serde_wasm_bindgen::from_value(result).map_err(|err| err.to_string())
}

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use futures::channel::oneshot;
use js_sys::Array;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{IdbDatabase, IdbObjectStore, IdbRequest, IdbTransaction, IdbTransactionMode};

use crate::queue::QueueItem;
use crate::stores::{QueueStore, QueueStoreError, StoreBackend, StoreOpener};

use super::js_message;

pub const INDEXED_DB_NAME: &str = "scorekeeper-offline-queue";

pub const INDEXED_DB_VERSION: u32 = 1;

pub const QUEUE_OBJECT_STORE: &str = "queue_items";

/// Queue items stored one record per item in IndexedDB, keyed by item id. Every operation runs in
/// its own transaction.
#[derive(Clone)]
pub struct IndexedDbQueueStore {
    db: IdbDatabase,
}

impl IndexedDbQueueStore {
    pub async fn open() -> Result<Self, IndexedDbQueueStoreError> {
        let db = indexed_db_handle().await?;
        Ok(Self { db })
    }

    fn transaction(
        &self,
        mode: IdbTransactionMode,
    ) -> Result<(IdbTransaction, IdbObjectStore), IndexedDbQueueStoreError> {
        let tx = self
            .db
            .transaction_with_str_and_mode(QUEUE_OBJECT_STORE, mode)
            .map_err(js_error)?;
        let store = tx.object_store(QUEUE_OBJECT_STORE).map_err(js_error)?;

        Ok((tx, store))
    }
}

#[async_trait(?Send)]
impl QueueStore for IndexedDbQueueStore {
    async fn delete(&self, id: &str) -> Result<(), QueueStoreError> {
        let (tx, store) = self.transaction(IdbTransactionMode::Readwrite)?;

        store
            .delete(&JsValue::from_str(id))
            .map_err(js_error)?;
        wait_for_transaction(&tx).await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<QueueItem>, QueueStoreError> {
        let (_tx, store) = self.transaction(IdbTransactionMode::Readonly)?;

        let request = store.get(&JsValue::from_str(id)).map_err(js_error)?;
        let value = wait_for_request(&request).await?;

        if value.is_undefined() || value.is_null() {
            return Ok(None);
        }

        Ok(Some(decode_item(&value)?))
    }

    async fn get_all(&self) -> Result<Vec<QueueItem>, QueueStoreError> {
        let (_tx, store) = self.transaction(IdbTransactionMode::Readonly)?;

        let request = store.get_all().map_err(js_error)?;
        let records = Array::from(&wait_for_request(&request).await?);

        Ok(decode_records(&records))
    }

    async fn put(&self, item: QueueItem) -> Result<(), QueueStoreError> {
        let (tx, store) = self.transaction(IdbTransactionMode::Readwrite)?;

        store
            .put_with_key(&encode_item(&item)?, &JsValue::from_str(item.id()))
            .map_err(|err| QueueStoreError::WriteFailure(js_message(&err)))?;
        wait_for_transaction(&tx).await?;

        Ok(())
    }

    async fn upsert_superseding(&self, item: QueueItem) -> Result<(), QueueStoreError> {
        // Reading, deleting and writing inside one readwrite transaction keeps other tabs from
        // observing or interleaving with the intermediate state
        let (tx, store) = self.transaction(IdbTransactionMode::Readwrite)?;

        let request = store.get_all().map_err(js_error)?;
        let records = Array::from(&wait_for_request(&request).await?);

        for existing in decode_records(&records) {
            if item.supersedes(&existing) {
                tracing::debug!(superseded = existing.id(), by = item.id(), "replacing queued score update");
                store
                    .delete(&JsValue::from_str(existing.id()))
                    .map_err(js_error)?;
            }
        }

        store
            .put_with_key(&encode_item(&item)?, &JsValue::from_str(item.id()))
            .map_err(|err| QueueStoreError::WriteFailure(js_message(&err)))?;
        wait_for_transaction(&tx).await?;

        Ok(())
    }
}

/// First choice in the browser, unavailable in some private browsing modes and sandboxed frames.
pub struct IndexedDbOpener;

#[async_trait(?Send)]
impl StoreOpener for IndexedDbOpener {
    fn backend(&self) -> StoreBackend {
        StoreBackend::RecordStore
    }

    async fn open(&self) -> Result<Box<dyn QueueStore>, QueueStoreError> {
        Ok(Box::new(IndexedDbQueueStore::open().await?))
    }
}

fn decode_item(value: &JsValue) -> Result<QueueItem, IndexedDbQueueStoreError> {
    let json = js_sys::JSON::stringify(value)
        .map_err(js_error)?
        .as_string()
        .ok_or_else(|| IndexedDbQueueStoreError::Corrupt("record isn't representable as JSON".into()))?;

    serde_json::from_str(&json).map_err(|err| IndexedDbQueueStoreError::Corrupt(err.to_string()))
}

fn decode_records(records: &Array) -> Vec<QueueItem> {
    records
        .iter()
        .filter_map(|record| match decode_item(&record) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::warn!("skipping unreadable queue record: {err}");
                None
            }
        })
        .collect()
}

fn encode_item(item: &QueueItem) -> Result<JsValue, QueueStoreError> {
    let json = serde_json::to_string(item)
        .map_err(|err| QueueStoreError::Implementation(err.to_string()))?;

    js_sys::JSON::parse(&json).map_err(|err| QueueStoreError::Implementation(js_message(&err)))
}

async fn indexed_db_handle() -> Result<IdbDatabase, IndexedDbQueueStoreError> {
    let window = web_sys::window().ok_or(IndexedDbQueueStoreError::WindowUnavailable)?;

    let idb_factory = match window.indexed_db() {
        Ok(Some(factory)) => factory,
        Ok(None) => return Err(IndexedDbQueueStoreError::IndexedDbUnavailable),
        Err(err) => return Err(js_error(err)),
    };

    let open_request = idb_factory
        .open_with_u32(INDEXED_DB_NAME, INDEXED_DB_VERSION)
        .map_err(js_error)?;

    let on_upgrade_needed = Closure::wrap(Box::new(move |event: web_sys::IdbVersionChangeEvent| {
        let db = event
            .target()
            .and_then(|target| target.dyn_into::<IdbRequest>().ok())
            .and_then(|request| request.result().ok())
            .and_then(|result| result.dyn_into::<IdbDatabase>().ok());

        let Some(db) = db else {
            tracing::error!("upgrade event didn't carry a database handle");
            return;
        };

        if !db.object_store_names().contains(QUEUE_OBJECT_STORE) {
            if let Err(err) = db.create_object_store(QUEUE_OBJECT_STORE) {
                tracing::error!("failed to create queue object store: {}", js_message(&err));
            }
        }
    }) as Box<dyn FnMut(_)>);

    open_request.set_onupgradeneeded(Some(on_upgrade_needed.as_ref().unchecked_ref()));

    let opened = wait_for_request(&open_request).await;
    open_request.set_onupgradeneeded(None);
    drop(on_upgrade_needed);

    let db: IdbDatabase = opened?
        .dyn_into()
        .map_err(|_| IndexedDbQueueStoreError::DbError("open didn't produce a database".into()))?;

    tracing::debug!(name = INDEXED_DB_NAME, version = INDEXED_DB_VERSION, "opened IndexedDB queue");

    Ok(db)
}

fn js_error(err: JsValue) -> IndexedDbQueueStoreError {
    IndexedDbQueueStoreError::DbError(js_message(&err))
}

async fn wait_for_request(request: &IdbRequest) -> Result<JsValue, IndexedDbQueueStoreError> {
    let (sender, receiver) = oneshot::channel::<Result<JsValue, String>>();
    let sender = Rc::new(RefCell::new(Some(sender)));

    let success_sender = sender.clone();
    let success_request = request.clone();
    let on_success = Closure::wrap(Box::new(move |_: web_sys::Event| {
        let result = success_request.result().unwrap_or(JsValue::UNDEFINED);
        if let Some(sender) = success_sender.borrow_mut().take() {
            let _ = sender.send(Ok(result));
        }
    }) as Box<dyn FnMut(_)>);

    let error_request = request.clone();
    let on_error = Closure::wrap(Box::new(move |_: web_sys::Event| {
        let message = error_request
            .error()
            .ok()
            .flatten()
            .map(|exception| exception.message())
            .unwrap_or_else(|| "unknown IndexedDB request error".to_string());

        if let Some(sender) = sender.borrow_mut().take() {
            let _ = sender.send(Err(message));
        }
    }) as Box<dyn FnMut(_)>);

    request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
    request.set_onerror(Some(on_error.as_ref().unchecked_ref()));

    let result = receiver.await;

    request.set_onsuccess(None);
    request.set_onerror(None);

    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(IndexedDbQueueStoreError::DbError(message)),
        Err(_) => Err(IndexedDbQueueStoreError::DbError("request callbacks dropped".into())),
    }
}

async fn wait_for_transaction(tx: &IdbTransaction) -> Result<(), IndexedDbQueueStoreError> {
    let (sender, receiver) = oneshot::channel::<Result<(), String>>();
    let sender = Rc::new(RefCell::new(Some(sender)));

    let complete_sender = sender.clone();
    let on_complete = Closure::wrap(Box::new(move |_: web_sys::Event| {
        if let Some(sender) = complete_sender.borrow_mut().take() {
            let _ = sender.send(Ok(()));
        }
    }) as Box<dyn FnMut(_)>);

    let failed_tx = tx.clone();
    let on_error = Closure::wrap(Box::new(move |_: web_sys::Event| {
        let message = failed_tx
            .error()
            .map(|exception| exception.message())
            .unwrap_or_else(|| "transaction failed".to_string());

        if let Some(sender) = sender.borrow_mut().take() {
            let _ = sender.send(Err(message));
        }
    }) as Box<dyn FnMut(_)>);

    tx.set_oncomplete(Some(on_complete.as_ref().unchecked_ref()));
    tx.set_onerror(Some(on_error.as_ref().unchecked_ref()));
    tx.set_onabort(Some(on_error.as_ref().unchecked_ref()));

    let result = receiver.await;

    tx.set_oncomplete(None);
    tx.set_onerror(None);
    tx.set_onabort(None);

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(message)) => Err(IndexedDbQueueStoreError::TransactionFailed(message)),
        Err(_) => Err(IndexedDbQueueStoreError::DbError("transaction callbacks dropped".into())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexedDbQueueStoreError {
    #[error("stored queue record is corrupt: {0}")]
    Corrupt(String),

    #[error("error interacting with IndexedDB: {0}")]
    DbError(String),

    #[error("IndexedDB isn't available in the browser or has been disabled")]
    IndexedDbUnavailable,

    #[error("IndexedDB transaction failed: {0}")]
    TransactionFailed(String),

    #[error("failed to get browser window object")]
    WindowUnavailable,
}

impl From<IndexedDbQueueStoreError> for QueueStoreError {
    fn from(err: IndexedDbQueueStoreError) -> Self {
        match err {
            IndexedDbQueueStoreError::Corrupt(msg) => QueueStoreError::Corrupt(msg),
            IndexedDbQueueStoreError::IndexedDbUnavailable
            | IndexedDbQueueStoreError::WindowUnavailable => {
                QueueStoreError::Unavailable(err.to_string())
            }
            IndexedDbQueueStoreError::TransactionFailed(msg) => QueueStoreError::WriteFailure(msg),
            IndexedDbQueueStoreError::DbError(msg) => QueueStoreError::Implementation(msg),
        }
    }
}

mod indexed_db_queue_store;
mod local_storage_slot;

pub use indexed_db_queue_store::{
    IndexedDbOpener, IndexedDbQueueStore, IndexedDbQueueStoreError, INDEXED_DB_NAME,
    INDEXED_DB_VERSION, QUEUE_OBJECT_STORE,
};
pub use local_storage_slot::LocalStorageSlot;

use wasm_bindgen::{JsCast, JsValue};

use crate::stores::{KeyValueOpener, KeyValueSlot, MemoryOpener, StoreOpener};

/// IndexedDB, then a single `localStorage` slot, then memory.
pub fn browser_openers() -> Vec<Box<dyn StoreOpener>> {
    vec![
        Box::new(IndexedDbOpener),
        Box::new(KeyValueOpener::new(|| {
            Ok(Box::new(LocalStorageSlot::open()?) as Box<dyn KeyValueSlot>)
        })),
        Box::new(MemoryOpener),
    ]
}

pub(crate) fn js_message(err: &JsValue) -> String {
    err.dyn_ref::<web_sys::DomException>()
        .map(|exception| exception.message())
        .or_else(|| err.as_string())
        .unwrap_or_else(|| format!("{err:?}"))
}

use std::rc::Rc;

use js_sys::Reflect;
use wasm_bindgen::JsValue;

use crate::cache::{QueryCache, ReloadSignal};
use crate::clock::SystemClock;
use crate::stores::KeyValueSlot;
use crate::wasm::browser_store::LocalStorageSlot;

/// Reads the navigation timing entry of the current page to tell whether the user hit reload.
#[derive(Clone, Copy, Debug, Default)]
pub struct NavigationReload;

impl ReloadSignal for NavigationReload {
    fn was_reloaded(&self) -> bool {
        let Some(performance) = web_sys::window().and_then(|window| window.performance()) else {
            return false;
        };

        let type_key = JsValue::from_str("type");

        performance
            .get_entries_by_type("navigation")
            .iter()
            .any(|entry| {
                Reflect::get(&entry, &type_key)
                    .ok()
                    .and_then(|kind| kind.as_string())
                    .is_some_and(|kind| kind == "reload")
            })
    }
}

/// A query cache persisted to `localStorage` when it's usable and held in memory otherwise.
pub fn browser_query_cache() -> QueryCache {
    let slot = match LocalStorageSlot::open() {
        Ok(slot) => Some(Rc::new(slot) as Rc<dyn KeyValueSlot>),
        Err(err) => {
            tracing::warn!("query cache falling back to memory only: {err}");
            None
        }
    };

    QueryCache::with_parts(slot, SystemClock, &NavigationReload)
}

use std::fmt::{self, Display, Formatter};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Top level error surfaced by the binary and the JS bindings. Library internals use their own
/// typed errors and only collapse into this at the outer edges.
#[derive(Debug)]
pub struct ScorekeeperError(pub String);

impl From<&'static str> for ScorekeeperError {
    fn from(val: &'static str) -> Self {
        Self(val.to_string())
    }
}

impl From<String> for ScorekeeperError {
    fn from(val: String) -> Self {
        Self(val)
    }
}

impl Display for ScorekeeperError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ScorekeeperError {}

impl From<serde_json::Error> for ScorekeeperError {
    fn from(error: serde_json::Error) -> Self {
        Self(error.to_string())
    }
}

impl From<crate::queue::OfflineQueueError> for ScorekeeperError {
    fn from(error: crate::queue::OfflineQueueError) -> Self {
        Self(error.to_string())
    }
}

impl From<crate::cache::QueryCacheError> for ScorekeeperError {
    fn from(error: crate::cache::QueryCacheError) -> Self {
        Self(error.to_string())
    }
}

impl From<crate::stores::QueueStoreError> for ScorekeeperError {
    fn from(error: crate::stores::QueueStoreError) -> Self {
        Self(error.to_string())
    }
}

#[cfg(feature = "remote-api")]
impl From<crate::api::ApiClientError> for ScorekeeperError {
    fn from(error: crate::api::ApiClientError) -> Self {
        Self(error.to_string())
    }
}

#[cfg(target_arch = "wasm32")]
impl From<serde_wasm_bindgen::Error> for ScorekeeperError {
    fn from(error: serde_wasm_bindgen::Error) -> Self {
        Self(error.to_string())
    }
}

#[cfg(target_arch = "wasm32")]
impl From<ScorekeeperError> for JsValue {
    fn from(error: ScorekeeperError) -> Self {
        js_sys::Error::new(&error.0).into()
    }
}

pub type ScorekeeperResult<T> = Result<T, ScorekeeperError>;

use web_sys::Storage;

use crate::stores::{KeyValueSlot, SlotError};

use super::js_message;

/// `window.localStorage`. Writes fail once the origin's quota is used up, which surfaces as
/// [`SlotError::Write`].
#[derive(Clone)]
pub struct LocalStorageSlot {
    storage: Storage,
}

impl LocalStorageSlot {
    pub fn open() -> Result<Self, SlotError> {
        let window = web_sys::window()
            .ok_or_else(|| SlotError::Unavailable("no browser window".to_string()))?;

        let storage = window
            .local_storage()
            .map_err(|err| SlotError::Unavailable(js_message(&err)))?
            .ok_or_else(|| SlotError::Unavailable("localStorage is disabled".to_string()))?;

        Ok(Self { storage })
    }
}

impl KeyValueSlot for LocalStorageSlot {
    fn get_item(&self, key: &str) -> Result<Option<String>, SlotError> {
        self.storage
            .get_item(key)
            .map_err(|err| SlotError::Read(js_message(&err)))
    }

    fn keys(&self) -> Result<Vec<String>, SlotError> {
        let length = self
            .storage
            .length()
            .map_err(|err| SlotError::Read(js_message(&err)))?;

        let mut keys = Vec::with_capacity(length as usize);
        for index in 0..length {
            if let Some(key) = self
                .storage
                .key(index)
                .map_err(|err| SlotError::Read(js_message(&err)))?
            {
                keys.push(key);
            }
        }

        Ok(keys)
    }

    fn remove_item(&self, key: &str) -> Result<(), SlotError> {
        self.storage
            .remove_item(key)
            .map_err(|err| SlotError::Write(js_message(&err)))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), SlotError> {
        self.storage
            .set_item(key, value)
            .map_err(|err| SlotError::Write(js_message(&err)))
    }
}

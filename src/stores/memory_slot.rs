use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::stores::traits::{KeyValueSlot, SlotError};

/// Process local key-value slots. Stands in for `localStorage` in tests and anywhere the caller
/// explicitly doesn't want persistence.
#[derive(Default)]
pub struct MemorySlot {
    entries: RwLock<BTreeMap<String, String>>,
}

impl KeyValueSlot for MemorySlot {
    fn get_item(&self, key: &str) -> Result<Option<String>, SlotError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| SlotError::Read("memory slot lock poisoned".to_string()))?;

        Ok(entries.get(key).cloned())
    }

    fn keys(&self) -> Result<Vec<String>, SlotError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| SlotError::Read("memory slot lock poisoned".to_string()))?;

        Ok(entries.keys().cloned().collect())
    }

    fn remove_item(&self, key: &str) -> Result<(), SlotError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| SlotError::Write("memory slot lock poisoned".to_string()))?;

        entries.remove(key);
        Ok(())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), SlotError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| SlotError::Write("memory slot lock poisoned".to_string()))?;

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

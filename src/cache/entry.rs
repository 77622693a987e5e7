use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CACHE_KEY_PREFIX: &str = "scorekeeper-query-cache";

/// Bumped whenever the persisted entry layout changes, older entries simply stop being found.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// A cached query result along with when it was fetched. Persisted as
/// `{"value": ..., "updatedAt": <unix ms>}`, anything without a numeric `updatedAt` is rejected
/// on read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub value: Value,
    pub updated_at: i64,
}

impl CacheEntry {
    /// Saturates instead of overflowing on nonsensical persisted timestamps.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.updated_at)
    }

    /// Freshness is strict, an entry exactly `ttl_ms` old is already stale.
    pub fn is_fresh(&self, now_ms: i64, ttl_ms: i64) -> bool {
        self.age_ms(now_ms) < ttl_ms
    }
}

pub(crate) fn storage_key(key: &str) -> String {
    format!("{CACHE_KEY_PREFIX}:v{CACHE_SCHEMA_VERSION}:{key}")
}

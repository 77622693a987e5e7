// Note: wasm-pack test does not run any unit tests that are pub reachable from the root module, I
// think this includes the test module itself

#[cfg(feature = "remote-api")]
pub mod api;

pub mod cache;
pub mod clock;
pub mod connectivity;
pub mod error;
pub mod queue;
pub mod remote;
pub mod stores;
pub mod utils;
pub mod version;

#[cfg(target_arch = "wasm32")]
pub mod wasm;

// Re-export some of our dependencies for QoL, implementors of the storage and remote traits need it
pub use async_trait;

pub mod prelude {
    #[cfg(feature = "remote-api")]
    pub use crate::api::*;

    pub use crate::error::*;
    pub use crate::version::*;

    pub use crate::cache::{CacheOptions, QueryCache, QueryCacheError, ReloadSignal, Spawner};
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::connectivity::{AlwaysOnline, Connectivity, ManualConnectivity};
    pub use crate::queue::{
        BackoffPolicy, DeadLetterAfter, DrainHooks, DrainReport, EnqueueOptions, FailurePolicy,
        MatchLogEntry, OfflineQueue, OfflineQueueError, QueueDrainer, QueueItem, QueueItemKind,
        RetryForever, ScoreUpdate,
    };
    pub use crate::remote::{MatchWriter, RemoteErrorKind, RemoteWriteError};
    pub use crate::stores::{
        default_openers, KeyValueSlot, LazyQueueStore, QueueStore, QueueStoreError, StoreBackend,
        StoreOpener,
    };
}

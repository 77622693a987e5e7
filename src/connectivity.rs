use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{LocalBoxStream, StreamExt};

/// Stream of "the environment just came back online" notifications. Dropping it unsubscribes.
pub type OnlineEvents = LocalBoxStream<'static, ()>;

/// Best effort view of network connectivity. Being online is only a hint, a drain can still fail
/// while this reports online.
pub trait Connectivity {
    fn is_online(&self) -> bool;

    fn subscribe_online(&self) -> OnlineEvents;
}

/// For environments without any connectivity signal. Always claims to be online and never emits
/// reconnect events.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }

    fn subscribe_online(&self) -> OnlineEvents {
        futures::stream::pending().boxed_local()
    }
}

/// Connectivity driven by the embedding application, e.g. from a native network monitor or
/// tests. Clones share state.
#[derive(Clone, Debug)]
pub struct ManualConnectivity {
    online: Arc<AtomicBool>,
    subscribers: Arc<Mutex<Vec<UnboundedSender<()>>>>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Updates the state, notifying subscribers only on an offline to online transition.
    pub fn set_online(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online || !online {
            return;
        }

        tracing::debug!("connectivity restored");

        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|subscriber| subscriber.unbounded_send(()).is_ok());
        }
    }
}

impl Connectivity for ManualConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe_online(&self) -> OnlineEvents {
        let (sender, receiver) = unbounded();

        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(sender);
        }

        receiver.boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::FutureExt;

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_only_reconnects_are_announced() {
        let connectivity = ManualConnectivity::new(true);
        let mut events = connectivity.subscribe_online();

        connectivity.set_online(true);
        assert!(events.next().now_or_never().is_none());

        connectivity.set_online(false);
        assert!(!connectivity.is_online());
        assert!(events.next().now_or_never().is_none());

        connectivity.set_online(true);
        assert_eq!(events.next().await, Some(()));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let connectivity = ManualConnectivity::new(false);
        drop(connectivity.subscribe_online());
        let _kept = connectivity.subscribe_online();

        connectivity.set_online(true);

        assert_eq!(connectivity.subscribers.lock().unwrap().len(), 1);
    }
}

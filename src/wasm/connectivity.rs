use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc::{unbounded, UnboundedReceiver};
use futures::stream::{Stream, StreamExt};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::Window;

use crate::connectivity::{Connectivity, OnlineEvents};

/// `navigator.onLine` plus the window's `online` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NavigatorConnectivity;

impl Connectivity for NavigatorConnectivity {
    fn is_online(&self) -> bool {
        // Without a window there is nothing telling us otherwise, let the drain find out
        web_sys::window()
            .map(|window| window.navigator().on_line())
            .unwrap_or(true)
    }

    fn subscribe_online(&self) -> OnlineEvents {
        let Some(window) = web_sys::window() else {
            return futures::stream::pending().boxed_local();
        };

        let (sender, receiver) = unbounded();
        let listener = Closure::wrap(Box::new(move |_: web_sys::Event| {
            let _ = sender.unbounded_send(());
        }) as Box<dyn FnMut(_)>);

        if let Err(err) =
            window.add_event_listener_with_callback("online", listener.as_ref().unchecked_ref())
        {
            tracing::warn!("unable to listen for online events: {err:?}");
            return futures::stream::pending().boxed_local();
        }

        OnlineSubscription {
            listener,
            receiver,
            window,
        }
        .boxed_local()
    }
}

/// Removes the `online` listener again once the subscriber is dropped.
struct OnlineSubscription {
    listener: Closure<dyn FnMut(web_sys::Event)>,
    receiver: UnboundedReceiver<()>,
    window: Window,
}

impl Stream for OnlineSubscription {
    type Item = ();

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<()>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl Drop for OnlineSubscription {
    fn drop(&mut self) {
        let _ = self
            .window
            .remove_event_listener_with_callback("online", self.listener.as_ref().unchecked_ref());
    }
}

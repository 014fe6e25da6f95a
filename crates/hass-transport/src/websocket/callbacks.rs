//! Registry of inbound handlers keyed by wire `type` tag.

use std::{fmt, future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};

use super::message::{Message, MessageKind};

/// Asynchronous handler invoked with a decoded inbound message.
pub type Handler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure into a [`Handler`].
///
/// ```
/// use hass_transport::websocket::handler;
///
/// let on_event = handler(|message| async move {
///     println!("{}", message.type_tag());
/// });
/// # drop(on_event);
/// ```
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |message| f(message).boxed())
}

/// A handler and the kind inbound frames are decoded into before calling it.
#[derive(Clone)]
pub struct CallbackEntry {
    pub handler: Handler,
    pub kind: MessageKind,
}

impl fmt::Debug for CallbackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackEntry")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct CallbackRegistry {
    entries: scc::HashMap<String, CallbackEntry>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `tag`, replacing any previous registration.
    pub fn register(&self, tag: impl Into<String>, kind: MessageKind, handler: Handler) {
        let entry = CallbackEntry { handler, kind };
        match self.entries.entry_sync(tag.into()) {
            scc::hash_map::Entry::Occupied(mut occupied) => {
                *occupied.get_mut() = entry;
            }
            scc::hash_map::Entry::Vacant(vacant) => {
                vacant.insert_entry(entry);
            }
        }
    }

    /// Returns true if a registration was removed.
    pub fn deregister(&self, tag: &str) -> bool {
        self.entries.remove_sync(tag).is_some()
    }

    pub fn lookup(&self, tag: &str) -> Option<CallbackEntry> {
        self.entries.get_sync(tag).map(|entry| entry.get().clone())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.get_sync(tag).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

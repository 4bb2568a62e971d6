//! Listener Registry
//!
//! Ordered, keyed collection of listener handles with explicit unregistration.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Handle returned by every `subscribe`-style call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry<K, L: ?Sized> {
    id: ListenerId,
    key: K,
    listener: Arc<L>,
}

/// Listeners keyed by `K`, kept in registration order
pub struct ListenerRegistry<K, L: ?Sized> {
    next_id: u64,
    entries: Vec<Entry<K, L>>,
}

impl<K: PartialEq, L: ?Sized> ListenerRegistry<K, L> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, key: K, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry { id, key, listener });
        id
    }

    /// Remove exactly the listener behind `id`
    ///
    /// Returns false if it was already removed.
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Snapshot of the listeners registered under `key`, in registration order
    ///
    /// Callers invoke the snapshot after releasing their lock, so a listener
    /// may subscribe or unsubscribe without deadlocking.
    pub fn listeners_for(&self, key: &K) -> Vec<Arc<L>> {
        self.entries
            .iter()
            .filter(|e| &e.key == key)
            .map(|e| Arc::clone(&e.listener))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: PartialEq, L: ?Sized> Default for ListenerRegistry<K, L> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one listener, logging instead of propagating a panic
///
/// A failing listener must not stop the remaining listeners of the same event.
pub(crate) fn invoke_guarded<F: FnOnce()>(context: &'static str, f: F) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!(
            listener = context,
            panic = %panic_message(panic.as_ref()),
            "Listener panicked"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

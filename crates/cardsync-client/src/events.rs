//! Listener table for flushed notifications.
//!
//! Listeners register by notification name (`channels:add`, `change`, ...),
//! see [`Notification::name`].

use std::collections::BTreeMap;

use cardsync_shared::Notification;

/// Handle returned by [`Listeners::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

type Callback = Box<dyn FnMut(&Notification)>;

/// External listeners keyed by notification name.
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    by_name: BTreeMap<String, Vec<(ListenerId, Callback)>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&mut self, name: &str, callback: F) -> ListenerId
    where
        F: FnMut(&Notification) + 'static,
    {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.by_name
            .entry(name.to_string())
            .or_default()
            .push((id, Box::new(callback)));
        id
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        for callbacks in self.by_name.values_mut() {
            let before = callbacks.len();
            callbacks.retain(|(existing, _)| *existing != id);
            removed |= callbacks.len() != before;
        }
        self.by_name.retain(|_, callbacks| !callbacks.is_empty());
        removed
    }

    pub fn len(&self) -> usize {
        self.by_name.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Deliver `notification` to every listener registered for its name.
    pub fn emit(&mut self, notification: &Notification) {
        let name = notification.name();
        let Some(callbacks) = self.by_name.get_mut(&name) else {
            return;
        };
        tracing::trace!(event = %name, target = %notification.target, listeners = callbacks.len(), "emit");
        for (_, callback) in callbacks.iter_mut() {
            callback(notification);
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish()
    }
}

//! Listener bookkeeping between entities.
//!
//! Instead of entities holding callbacks on each other, the owning client
//! records who listens to whom.  A source is any entity or part raising
//! events; a subscriber is the entity that reacts to them.  Detaching a
//! subscriber or a source is a single synchronous call, so a destroyed
//! entity can never be reached through a stale listener.

use std::collections::{BTreeSet, HashMap};

use crate::types::EntityId;

#[derive(Debug, Default)]
pub struct Subscriptions {
    by_source: HashMap<EntityId, BTreeSet<EntityId>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `subscriber` to `source`.  Returns `false` if it already was.
    pub fn subscribe(&mut self, source: &EntityId, subscriber: &EntityId) -> bool {
        self.by_source
            .entry(source.clone())
            .or_default()
            .insert(subscriber.clone())
    }

    pub fn unsubscribe(&mut self, source: &EntityId, subscriber: &EntityId) -> bool {
        let Some(set) = self.by_source.get_mut(source) else {
            return false;
        };
        let removed = set.remove(subscriber);
        if set.is_empty() {
            self.by_source.remove(source);
        }
        removed
    }

    pub fn is_subscribed(&self, source: &EntityId, subscriber: &EntityId) -> bool {
        self.by_source
            .get(source)
            .is_some_and(|set| set.contains(subscriber))
    }

    /// Subscribers of `source`, in a stable order.
    pub fn subscribers(&self, source: &EntityId) -> Vec<EntityId> {
        self.by_source
            .get(source)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of sources `subscriber` currently listens to.
    pub fn subscription_count(&self, subscriber: &EntityId) -> usize {
        self.by_source
            .values()
            .filter(|set| set.contains(subscriber))
            .count()
    }

    /// Remove every subscription held by `subscriber`.
    pub fn detach_subscriber(&mut self, subscriber: &EntityId) -> usize {
        let mut removed = 0;
        self.by_source.retain(|_, set| {
            if set.remove(subscriber) {
                removed += 1;
            }
            !set.is_empty()
        });
        removed
    }

    /// Remove every listener attached to `source`.
    pub fn detach_source(&mut self, source: &EntityId) -> usize {
        self.by_source.remove(source).map_or(0, |set| set.len())
    }

    /// Move listeners from `old` to `new` after a rekey.
    pub fn rename_source(&mut self, old: &EntityId, new: &EntityId) {
        if let Some(set) = self.by_source.remove(old) {
            self.by_source.entry(new.clone()).or_default().extend(set);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_source.clear();
    }
}

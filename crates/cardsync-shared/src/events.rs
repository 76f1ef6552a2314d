//! Deferred, coalescing notification delivery.
//!
//! Every cross-entity notification is queued with [`EventQueue::trigger_async`]
//! and only delivered when the owner flushes the queue at the end of the
//! current synchronous batch.  At flush time repeated `change` notifications
//! for the same target collapse into the first one queued, and notifications
//! aimed at entities that have since been destroyed are dropped.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::types::{EntityId, EntityKind, SendResult};

/// The notification verbs exposed to listeners.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EventName {
    Add,
    Remove,
    Change,
    Loaded,
    LoadedError,
    Delete,
    Sent,
    SentError,
    ParseError,
}

/// Who a notification is delivered on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Raised by the client about an entity; survives the entity's destruction.
    Client,
    /// Raised by the entity itself; dropped once the entity is destroyed.
    Entity,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Change => "change",
            Self::Loaded => "loaded",
            Self::LoadedError => "loaded-error",
            Self::Delete => "delete",
            Self::Sent => "sent",
            Self::SentError => "sent-error",
            Self::ParseError => "parse-error",
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Self::Add | Self::Remove | Self::Delete | Self::LoadedError => Scope::Client,
            _ => Scope::Entity,
        }
    }

    /// Whether repeated notifications for one target collapse within a flush.
    pub fn coalesces(&self) -> bool {
        matches!(self, Self::Change)
    }
}

/// Event-specific data carried with a notification.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    None,
    /// Names of the properties that changed.
    Changes(Vec<String>),
    Sent(SendResult),
    Error(String),
    /// Serialized state of the entity an `add` or `remove` is about.
    Entity(Value),
}

/// A single queued notification.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub kind: EntityKind,
    pub event: EventName,
    pub target: EntityId,
    pub payload: Payload,
}

impl Notification {
    pub fn new(kind: EntityKind, event: EventName, target: EntityId) -> Self {
        Self {
            kind,
            event,
            target,
            payload: Payload::None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Listener-facing name, e.g. `channels:add`.
    ///
    /// Card models raise their own events without a kind prefix.
    pub fn name(&self) -> String {
        match self.kind {
            EntityKind::CardModel => self.event.as_str().to_string(),
            kind => format!("{}:{}", kind.plural(), self.event.as_str()),
        }
    }
}

/// Pending notifications for the current batch.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: Vec<Notification>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a notification for delivery at the next flush.
    pub fn trigger_async(&mut self, notification: Notification) {
        trace!(name = %notification.name(), target = %notification.target, "queued notification");
        self.pending.push(notification);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Snapshot of what is currently queued, in order.
    pub fn pending(&self) -> &[Notification] {
        &self.pending
    }

    /// Point queued notifications for `old` at `new` after a rekey.
    pub fn retarget(&mut self, old: &EntityId, new: &EntityId) {
        for notification in self.pending.iter_mut().filter(|n| &n.target == old) {
            notification.target = new.clone();
        }
    }

    /// Drain the queue into the list of notifications to deliver.
    ///
    /// `is_live` reports whether an entity-scoped target still exists; if it
    /// does not, its notifications are dropped.  Coalescing notifications
    /// keep the position of the first one queued, and their change lists
    /// are merged.
    pub fn flush<F>(&mut self, is_live: F) -> Vec<Notification>
    where
        F: Fn(EntityKind, &EntityId) -> bool,
    {
        let pending = std::mem::take(&mut self.pending);
        let mut delivered: Vec<Notification> = Vec::with_capacity(pending.len());
        let mut seen: HashMap<(EntityKind, EventName, EntityId), usize> = HashMap::new();
        let mut dropped = 0usize;

        for notification in pending {
            if notification.event.scope() == Scope::Entity
                && !is_live(notification.kind, &notification.target)
            {
                dropped += 1;
                continue;
            }

            if notification.event.coalesces() {
                let key = (
                    notification.kind,
                    notification.event,
                    notification.target.clone(),
                );
                if let Some(&idx) = seen.get(&key) {
                    merge_payload(&mut delivered[idx].payload, notification.payload);
                    continue;
                }
                seen.insert(key, delivered.len());
            }

            delivered.push(notification);
        }

        if dropped > 0 {
            debug!(dropped, "dropped notifications for destroyed targets");
        }
        delivered
    }
}

fn merge_payload(into: &mut Payload, from: Payload) {
    let Payload::Changes(more) = from else {
        return;
    };
    match into {
        Payload::Changes(existing) => {
            for name in more {
                if !existing.contains(&name) {
                    existing.push(name);
                }
            }
        }
        Payload::None => *into = Payload::Changes(more),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    fn change(target: &str) -> Notification {
        Notification::new(EntityKind::CardModel, EventName::Change, id(target))
    }

    #[test]
    fn test_same_target_changes_collapse() {
        let mut queue = EventQueue::new();
        for _ in 0..5 {
            queue.trigger_async(change("layer:///cardmodels/a"));
        }

        let delivered = queue.flush(|_, _| true);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].name(), "change");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_first_seen_position_and_no_reordering() {
        let mut queue = EventQueue::new();
        let channel = id("layer:///channels/c");
        queue.trigger_async(change("layer:///cardmodels/a"));
        queue.trigger_async(Notification::new(EntityKind::Channel, EventName::Add, channel.clone()));
        queue.trigger_async(change("layer:///cardmodels/b"));
        queue.trigger_async(change("layer:///cardmodels/a"));
        queue.trigger_async(Notification::new(EntityKind::Channel, EventName::Add, channel));

        let names: Vec<_> = queue
            .flush(|_, _| true)
            .into_iter()
            .map(|n| format!("{}@{}", n.name(), n.target.suffix()))
            .collect();
        assert_eq!(
            names,
            ["change@a", "channels:add@c", "change@b", "channels:add@c"]
        );
    }

    #[test]
    fn test_change_lists_are_merged() {
        let mut queue = EventQueue::new();
        let target = id("layer:///channels/c");
        for props in [vec!["metadata"], vec!["participants", "metadata"]] {
            queue.trigger_async(
                Notification::new(EntityKind::Channel, EventName::Change, target.clone())
                    .with_payload(Payload::Changes(props.into_iter().map(String::from).collect())),
            );
        }

        let delivered = queue.flush(|_, _| true);
        assert_eq!(delivered.len(), 1);
        assert_eq!(
            delivered[0].payload,
            Payload::Changes(vec!["metadata".into(), "participants".into()])
        );
    }

    #[test]
    fn test_destroyed_targets_are_dropped() {
        let mut queue = EventQueue::new();
        let gone = id("layer:///channels/gone");
        queue.trigger_async(Notification::new(EntityKind::Channel, EventName::Change, gone.clone()));
        queue.trigger_async(Notification::new(EntityKind::Channel, EventName::Remove, gone.clone()));

        let delivered = queue.flush(|_, target| target != &gone);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].name(), "channels:remove");
    }

    #[test]
    fn test_retarget_follows_rekey() {
        let mut queue = EventQueue::new();
        let old = id("layer:///channels/tmp");
        let new = id("layer:///channels/server");
        queue.trigger_async(Notification::new(EntityKind::Channel, EventName::Change, old.clone()));
        queue.retarget(&old, &new);

        let delivered = queue.flush(|_, target| target == &new);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].target, new);
    }
}

//! Generic identity-deduplicating registry.
//!
//! A [`Registry`] maps entity ids to shared handles and guarantees at most
//! one live instance per id.  Channels, messages and card models are all
//! stored in instances of it.  Every mutation goes through an [`EventHub`]
//! so that notifications are queued and listeners are detached in the same
//! synchronous step as the map update.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, warn};

use cardsync_shared::{
    EntityId, EntityKind, EventName, EventQueue, Notification, Payload, Result, Subscriptions,
};

/// Shared handle to a registered entity.
pub type Shared<T> = Rc<RefCell<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// Notification queue and listener table owned by one client.
#[derive(Debug, Default)]
pub struct EventHub {
    pub queue: EventQueue,
    pub subscriptions: Subscriptions,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `event` on `target`.
    pub fn trigger(&mut self, kind: EntityKind, event: EventName, target: &EntityId) {
        self.queue
            .trigger_async(Notification::new(kind, event, target.clone()));
    }

    /// Queue `event` on `target` carrying a snapshot of `entity`.
    pub fn trigger_entity<E: Serialize>(
        &mut self,
        kind: EntityKind,
        event: EventName,
        target: &EntityId,
        entity: &E,
    ) {
        let payload = match serde_json::to_value(entity) {
            Ok(value) => Payload::Entity(value),
            Err(e) => {
                warn!(%kind, id = %target, error = %e, "entity snapshot failed");
                Payload::None
            }
        };
        self.queue
            .trigger_async(Notification::new(kind, event, target.clone()).with_payload(payload));
    }
}

/// An entity that can live in a [`Registry`].
pub trait Registrable {
    const KIND: EntityKind;

    fn id(&self) -> &EntityId;

    fn set_id(&mut self, id: EntityId);

    /// Point the entity at its owning client so its events bubble there.
    fn attach_client(&mut self, _app_id: &str) {}

    fn is_destroyed(&self) -> bool;
}

/// An entity holding a foreign key to another registered entity.
pub trait Dependent {
    fn foreign_key(&self) -> Option<&EntityId>;

    fn set_foreign_key(&mut self, key: EntityId);
}

/// Outcome of [`Registry::rekey`].
#[derive(Debug)]
pub enum Rekey<E> {
    /// Nothing was registered under the old id.
    NotRegistered,
    Moved,
    /// Moved, and the instance previously cached under the new id was
    /// unregistered.
    Displaced(Shared<E>),
}

/// Keyed cache of one entity kind.
#[derive(Debug)]
pub struct Registry<E> {
    owner: String,
    entries: HashMap<EntityId, Shared<E>>,
}

impl<E: Registrable + Serialize> Registry<E> {
    /// Create an empty registry owned by the client `owner`.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            entries: HashMap::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Look up a raw identifier.
    ///
    /// Fails with `InvalidArgument` if `id` is not a well-formed identifier
    /// of this registry's kind.
    pub fn get(&self, id: &str) -> Result<Option<Shared<E>>> {
        let id = EntityId::parse_kind(id, E::KIND)?;
        Ok(self.entries.get(&id).cloned())
    }

    pub fn lookup(&self, id: &EntityId) -> Option<Shared<E>> {
        self.entries.get(id).cloned()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entries.contains_key(id)
    }

    /// Register `entity`.  The first registration for an id wins; later
    /// calls are no-ops and return `false`.
    pub fn register(&mut self, entity: &Shared<E>, hub: &mut EventHub) -> bool {
        let id = entity.borrow().id().clone();
        if self.entries.contains_key(&id) {
            debug!(kind = %E::KIND, id = %id, "already registered; keeping cached instance");
            return false;
        }

        entity.borrow_mut().attach_client(&self.owner);
        self.entries.insert(id.clone(), Rc::clone(entity));
        hub.trigger_entity(E::KIND, EventName::Add, &id, &*entity.borrow());
        debug!(kind = %E::KIND, id = %id, "registered");
        true
    }

    /// Remove `id` from the registry.
    ///
    /// Listeners on and of the entity are detached before the mapping is
    /// removed.  Absent ids are a no-op.
    pub fn unregister(&mut self, id: &EntityId, hub: &mut EventHub) -> Option<Shared<E>> {
        hub.subscriptions.detach_source(id);
        hub.subscriptions.detach_subscriber(id);

        let removed = self.entries.remove(id);
        if let Some(entity) = &removed {
            hub.trigger_entity(E::KIND, EventName::Remove, id, &*entity.borrow());
            debug!(kind = %E::KIND, id = %id, "unregistered");
        }
        removed
    }

    /// Move `entity` from `old_id` to the id it now carries.
    ///
    /// Queued notifications and listeners follow the entity.  A different
    /// instance already cached under the new id is unregistered first (its
    /// listeners detached and `remove` queued) and handed back so the caller
    /// can finish tearing it down.
    pub fn rekey(&mut self, entity: &Shared<E>, old_id: &EntityId, hub: &mut EventHub) -> Rekey<E> {
        let new_id = entity.borrow().id().clone();
        let Some(existing) = self.entries.remove(old_id) else {
            return Rekey::NotRegistered;
        };

        let displaced = match self.entries.get(&new_id) {
            Some(cached) if !Rc::ptr_eq(cached, &existing) => {
                warn!(kind = %E::KIND, id = %new_id, "rekey displaces a cached instance");
                self.unregister(&new_id, hub)
            }
            _ => None,
        };

        self.entries.insert(new_id.clone(), existing);
        hub.queue.retarget(old_id, &new_id);
        hub.subscriptions.rename_source(old_id, &new_id);
        debug!(kind = %E::KIND, old = %old_id, new = %new_id, "rekeyed");

        match displaced {
            Some(previous) => Rekey::Displaced(previous),
            None => Rekey::Moved,
        }
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entries.keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<Shared<E>> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<E: Registrable + Dependent + Serialize> Registry<E> {
    /// Every registered entity whose foreign key equals `key`.
    pub fn dependents_of(&self, key: &EntityId) -> Vec<Shared<E>> {
        self.entries
            .values()
            .filter(|e| e.borrow().foreign_key() == Some(key))
            .cloned()
            .collect()
    }

    /// Rewrite the foreign key of every dependent pointing at `old`.
    pub fn rewrite_foreign_keys(&self, old: &EntityId, new: &EntityId) -> usize {
        let dependents = self.dependents_of(old);
        for dependent in &dependents {
            dependent.borrow_mut().set_foreign_key(new.clone());
        }
        dependents.len()
    }
}

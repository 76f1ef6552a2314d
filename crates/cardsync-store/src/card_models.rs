//! Registry of live card models.
//!
//! Models are keyed by their part-derived id.  A secondary index keeps at
//! most one root model per backing message; child models (those with a
//! parent node) share their root's message and are only deduplicated by id.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use cardsync_shared::{EntityId, Result};

use crate::card_model::CardModel;
use crate::registry::{Dependent, EventHub, Registry, Shared};

/// Outcome of [`CardModelStore::register`].
#[derive(Debug)]
pub enum Registration {
    Added,
    /// An instance for this id (or this message's root) already exists and
    /// was kept; the caller should use it instead.
    Existing(Shared<CardModel>),
}

#[derive(Debug)]
pub struct CardModelStore {
    registry: Registry<CardModel>,
    roots: HashMap<EntityId, EntityId>,
}

impl CardModelStore {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            registry: Registry::new(owner),
            roots: HashMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Result<Option<Shared<CardModel>>> {
        self.registry.get(id)
    }

    pub fn lookup(&self, id: &EntityId) -> Option<Shared<CardModel>> {
        self.registry.lookup(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.registry.contains(id)
    }

    pub fn register(&mut self, model: &Shared<CardModel>, hub: &mut EventHub) -> Registration {
        let (id, message_id, is_root) = {
            let m = model.borrow();
            (m.id().clone(), m.message_id().cloned(), m.is_root())
        };

        if let Some(existing) = self.registry.lookup(&id) {
            return Registration::Existing(existing);
        }

        if is_root {
            if let Some(existing) = message_id
                .as_ref()
                .and_then(|msg| self.roots.get(msg))
                .and_then(|root| self.registry.lookup(root))
            {
                debug!(message_id = ?message_id, kept = %existing.borrow().id(), "message already has a root model");
                return Registration::Existing(existing);
            }
        }

        self.registry.register(model, hub);
        if let (true, Some(message_id)) = (is_root, message_id) {
            self.roots.insert(message_id, id);
        }
        Registration::Added
    }

    pub fn unregister(&mut self, id: &EntityId, hub: &mut EventHub) -> Option<Shared<CardModel>> {
        self.roots.retain(|_, root| root != id);
        self.registry.unregister(id, hub)
    }

    /// Every model (root and children) backed by `message_id`.
    pub fn models_for_message(&self, message_id: &EntityId) -> Vec<Shared<CardModel>> {
        self.registry.dependents_of(message_id)
    }

    pub fn root_for_message(&self, message_id: &EntityId) -> Option<Shared<CardModel>> {
        self.roots
            .get(message_id)
            .and_then(|id| self.registry.lookup(id))
    }

    /// Follow a message rekey: rewrite each model's message reference and
    /// the part ids in `moved_parts`.  Model ids are derived from the part
    /// suffix and stay as they are.
    pub fn rekey_message(
        &mut self,
        old: &EntityId,
        new: &EntityId,
        moved_parts: &[(EntityId, EntityId)],
    ) -> usize {
        if let Some(root) = self.roots.remove(old) {
            self.roots.insert(new.clone(), root);
        }
        let models = self.registry.dependents_of(old);
        for model in &models {
            let mut model = model.borrow_mut();
            model.set_foreign_key(new.clone());
            model.rename_parts(moved_parts);
        }
        models.len()
    }

    pub fn values(&self) -> Vec<Shared<CardModel>> {
        self.registry.values()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn clear(&mut self) {
        self.roots.clear();
        self.registry.clear();
    }
}

/// Whether two handles point at the same model instance.
pub fn same_model(a: &Shared<CardModel>, b: &Shared<CardModel>) -> bool {
    Rc::ptr_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card_model::ModelKind;
    use crate::models::{Message, MessagePart};
    use crate::registry::shared;
    use cardsync_shared::EntityKind;

    fn message() -> Message {
        let id = EntityId::with_suffix(EntityKind::Message, "m");
        let channel = EntityId::with_suffix(EntityKind::Channel, "c");
        let mime = ModelKind::Text.mime_type();
        let parts = vec![
            MessagePart::new(EntityId::part_of(&id, "p0"), mime, None).with_node_id("n0"),
            MessagePart::new(EntityId::part_of(&id, "p1"), mime, None).with_node_id("n1"),
            MessagePart::new(EntityId::part_of(&id, "p2"), mime, None)
                .with_node_id("n2")
                .with_parent_node_id("n0"),
        ];
        Message::new(id, channel, parts)
    }

    fn bound(message: &Message, idx: usize) -> Shared<CardModel> {
        let mut model = CardModel::new(ModelKind::Text);
        model.bind(message, Some(&message.parts[idx].id)).unwrap();
        shared(model)
    }

    #[test]
    fn test_one_root_model_per_message() {
        let mut hub = EventHub::new();
        let mut store = CardModelStore::new("app");
        let msg = message();

        let first = bound(&msg, 0);
        assert!(matches!(store.register(&first, &mut hub), Registration::Added));

        let second_root = bound(&msg, 1);
        match store.register(&second_root, &mut hub) {
            Registration::Existing(existing) => assert!(same_model(&existing, &first)),
            Registration::Added => panic!("second root should not register"),
        }

        let child = bound(&msg, 2);
        assert!(matches!(store.register(&child, &mut hub), Registration::Added));
        assert_eq!(store.models_for_message(&msg.id).len(), 2);
        assert!(same_model(&store.root_for_message(&msg.id).unwrap(), &first));
    }

    #[test]
    fn test_same_part_yields_same_instance() {
        let mut hub = EventHub::new();
        let mut store = CardModelStore::new("app");
        let msg = message();

        let first = bound(&msg, 2);
        store.register(&first, &mut hub);
        match store.register(&bound(&msg, 2), &mut hub) {
            Registration::Existing(existing) => assert!(same_model(&existing, &first)),
            Registration::Added => panic!("duplicate id registered"),
        }
    }

    #[test]
    fn test_unregister_clears_root_index() {
        let mut hub = EventHub::new();
        let mut store = CardModelStore::new("app");
        let msg = message();
        let root = bound(&msg, 0);
        let id = root.borrow().id().clone();
        store.register(&root, &mut hub);

        assert!(store.unregister(&id, &mut hub).is_some());
        assert!(store.root_for_message(&msg.id).is_none());
        assert!(matches!(store.register(&bound(&msg, 1), &mut hub), Registration::Added));
    }

    #[test]
    fn test_rekey_message() {
        let mut hub = EventHub::new();
        let mut store = CardModelStore::new("app");
        let msg = message();
        let root = bound(&msg, 0);
        store.register(&root, &mut hub);

        let id = root.borrow().id().clone();

        let mut moved = msg.clone();
        let new = EntityId::with_suffix(EntityKind::Message, "server");
        let parts = moved.rekey(new.clone());
        assert_eq!(store.rekey_message(&msg.id, &new, &parts), 1);

        let root = root.borrow();
        assert_eq!(root.message_id(), Some(&new));
        assert_eq!(root.part_id(), Some(&EntityId::part_of(&new, "p0")));
        assert_eq!(root.child_part_ids(), [EntityId::part_of(&new, "p2")]);
        assert_eq!(root.id(), &id);
        assert!(store.root_for_message(&new).is_some());
    }
}

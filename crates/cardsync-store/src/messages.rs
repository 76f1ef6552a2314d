//! Registry instantiation for [`Message`] records.

use cardsync_shared::{EntityId, EntityKind};

use crate::models::{Message, MessageData, SyncState};
use crate::registry::{Dependent, Registrable, Registry};

/// Messages keyed by id.  Each message depends on its channel via `parent_id`.
pub type MessageStore = Registry<Message>;

impl Registrable for Message {
    const KIND: EntityKind = EntityKind::Message;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn is_destroyed(&self) -> bool {
        self.is_destroyed
    }
}

impl Dependent for Message {
    fn foreign_key(&self) -> Option<&EntityId> {
        Some(&self.parent_id)
    }

    fn set_foreign_key(&mut self, key: EntityId) {
        self.parent_id = key;
    }
}

impl Message {
    /// Fill a placeholder with server values.
    pub fn populate(&mut self, data: MessageData) {
        self.parent_id = data.parent_id;
        self.parts = data.parts;
        self.sent_at = data.sent_at;
        self.sync_state = SyncState::Synced;
    }

    /// Take on `new` as this message's id and move every part under it.
    ///
    /// Returns the `(old, new)` id of each part that moved.
    pub fn rekey(&mut self, new: EntityId) -> Vec<(EntityId, EntityId)> {
        let mut moved = Vec::with_capacity(self.parts.len());
        for part in &mut self.parts {
            if let Some(rebased) = part.id.rebased_part(&new) {
                if rebased != part.id {
                    moved.push((std::mem::replace(&mut part.id, rebased.clone()), rebased));
                }
            }
        }
        self.id = new;
        moved
    }
}

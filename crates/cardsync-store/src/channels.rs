//! Registry instantiation for [`Channel`] records.

use chrono::Utc;

use cardsync_shared::{EntityId, EntityKind};

use crate::models::{Channel, ChannelData, ChannelUpdate, SyncState};
use crate::registry::{Registrable, Registry};

/// Channels keyed by id.
pub type ChannelStore = Registry<Channel>;

impl Registrable for Channel {
    const KIND: EntityKind = EntityKind::Channel;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn attach_client(&mut self, app_id: &str) {
        if self.client_id != app_id {
            self.client_id = app_id.to_string();
        }
    }

    fn is_destroyed(&self) -> bool {
        self.is_destroyed
    }
}

impl Channel {
    /// Fill a placeholder (or refresh a channel) with server values.
    pub fn populate(&mut self, data: ChannelData) {
        self.participants = data.participants;
        self.metadata = data.metadata;
        self.created_at = data.created_at.or(self.created_at).or_else(|| Some(Utc::now()));
        self.sync_state = SyncState::Synced;
    }

    /// Apply a partial update and return the names of the properties that
    /// actually changed.
    pub fn apply_update(&mut self, update: ChannelUpdate) -> Vec<String> {
        let mut changed = Vec::new();

        if let Some(participants) = update.participants {
            if participants != self.participants {
                self.participants = participants;
                changed.push("participants".to_string());
            }
        }

        if let Some(metadata) = update.metadata {
            if metadata != self.metadata {
                self.metadata = metadata;
                changed.push("metadata".to_string());
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn metadata(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_apply_update_reports_only_real_changes() {
        let mut channel = Channel::new(vec!["a".into()], metadata(json!({ "title": "x" })));

        let changed = channel.apply_update(ChannelUpdate {
            participants: Some(vec!["a".into()]),
            metadata: Some(metadata(json!({ "title": "y" }))),
        });
        assert_eq!(changed, vec!["metadata".to_string()]);
        assert_eq!(channel.metadata["title"], "y");

        assert!(channel.apply_update(ChannelUpdate::default()).is_empty());
    }

    #[test]
    fn test_populate_placeholder() {
        let id = EntityId::with_suffix(EntityKind::Channel, "c1");
        let mut channel = Channel::placeholder(id);
        assert_eq!(channel.sync_state, SyncState::Loading);

        channel.populate(ChannelData {
            participants: vec!["a".into(), "b".into()],
            ..Default::default()
        });
        assert_eq!(channel.sync_state, SyncState::Synced);
        assert_eq!(channel.participants.len(), 2);
        assert!(channel.created_at.is_some());
    }
}

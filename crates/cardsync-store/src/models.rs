//! Entity structs held by the client's registries.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a UI layer.  Destruction flags are runtime-only and never
//! serialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use cardsync_shared::constants::ROLE_ROOT;
use cardsync_shared::{EntityId, EntityKind};

// ---------------------------------------------------------------------------
// Sync state
// ---------------------------------------------------------------------------

/// Where an entity stands relative to the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Created locally under a tentative id; not yet acknowledged.
    #[default]
    New,
    /// Placeholder waiting for the loader to populate it.
    Loading,
    /// Confirmed by (or loaded from) the server.
    Synced,
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A conversation channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    /// URI-shaped channel identifier.
    pub id: EntityId,
    /// Identifier of the owning client, set at registration.
    pub client_id: String,
    /// Participant identity ids.
    pub participants: Vec<String>,
    /// Free-form channel metadata.
    pub metadata: Map<String, Value>,
    pub sync_state: SyncState,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub is_destroyed: bool,
}

impl Channel {
    /// A locally created channel with a tentative id.
    pub fn new(participants: Vec<String>, metadata: Map<String, Value>) -> Self {
        Self {
            id: EntityId::generate(EntityKind::Channel),
            client_id: String::new(),
            participants,
            metadata,
            sync_state: SyncState::New,
            created_at: Some(Utc::now()),
            is_destroyed: false,
        }
    }

    /// An empty channel standing in for one being loaded.
    pub fn placeholder(id: EntityId) -> Self {
        Self {
            id,
            client_id: String::new(),
            participants: Vec::new(),
            metadata: Map::new(),
            sync_state: SyncState::Loading,
            created_at: None,
            is_destroyed: false,
        }
    }
}

/// Server-side field values used to populate a channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelData {
    pub participants: Vec<String>,
    pub metadata: Map<String, Value>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A partial update to a channel; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelUpdate {
    pub participants: Option<Vec<String>>,
    pub metadata: Option<Map<String, Value>>,
}

// ---------------------------------------------------------------------------
// Message part
// ---------------------------------------------------------------------------

/// Hierarchical placement attributes carried by every part.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MimeAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(rename = "node-id", default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(rename = "parent-node-id", default, skip_serializing_if = "Option::is_none")]
    pub parent_node_id: Option<String>,
}

/// Leaf content unit of a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePart {
    /// `<message id>/parts/<suffix>`.
    pub id: EntityId,
    pub mime_type: String,
    /// Content; absent until fetched.
    pub body: Option<String>,
    pub mime_attributes: MimeAttributes,
}

impl MessagePart {
    pub fn new(id: EntityId, mime_type: impl Into<String>, body: Option<String>) -> Self {
        Self {
            id,
            mime_type: mime_type.into(),
            body,
            mime_attributes: MimeAttributes::default(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.mime_attributes.role = Some(role.into());
        self
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.mime_attributes.node_id = Some(node_id.into());
        self
    }

    pub fn with_parent_node_id(mut self, parent: impl Into<String>) -> Self {
        self.mime_attributes.parent_node_id = Some(parent.into());
        self
    }

    pub fn role(&self) -> Option<&str> {
        self.mime_attributes.role.as_deref()
    }

    pub fn node_id(&self) -> Option<&str> {
        self.mime_attributes.node_id.as_deref()
    }

    pub fn parent_node_id(&self) -> Option<&str> {
        self.mime_attributes.parent_node_id.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.role() == Some(ROLE_ROOT)
    }

    pub fn has_content(&self) -> bool {
        self.body.is_some()
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// An ordered collection of parts belonging to a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: EntityId,
    /// Identifier of the owning channel.
    pub parent_id: EntityId,
    pub parts: Vec<MessagePart>,
    pub sync_state: SyncState,
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub is_destroyed: bool,
}

impl Message {
    pub fn new(id: EntityId, parent_id: EntityId, parts: Vec<MessagePart>) -> Self {
        Self {
            id,
            parent_id,
            parts,
            sync_state: SyncState::New,
            sent_at: None,
            is_destroyed: false,
        }
    }

    /// An empty message standing in for one being loaded.
    ///
    /// The parent is unknown until the loader fills it in, so it points at
    /// a null channel.
    pub fn placeholder(id: EntityId) -> Self {
        Self {
            id,
            parent_id: EntityId::with_suffix(EntityKind::Channel, "unknown"),
            parts: Vec::new(),
            sync_state: SyncState::Loading,
            sent_at: None,
            is_destroyed: false,
        }
    }

    pub fn part(&self, id: &EntityId) -> Option<&MessagePart> {
        self.parts.iter().find(|p| &p.id == id)
    }

    pub fn part_mut(&mut self, id: &EntityId) -> Option<&mut MessagePart> {
        self.parts.iter_mut().find(|p| &p.id == id)
    }

    pub fn contains_part(&self, id: &EntityId) -> bool {
        self.parts.iter().any(|p| &p.id == id)
    }

    /// Append a part.  Returns `false` if a part with that id is present.
    pub fn add_part(&mut self, part: MessagePart) -> bool {
        if self.contains_part(&part.id) {
            return false;
        }
        self.parts.push(part);
        true
    }

    pub fn remove_part(&mut self, id: &EntityId) -> Option<MessagePart> {
        let idx = self.parts.iter().position(|p| &p.id == id)?;
        Some(self.parts.remove(idx))
    }
}

/// Server-side field values used to populate a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageData {
    pub parent_id: EntityId,
    pub parts: Vec<MessagePart>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        let id = EntityId::with_suffix(EntityKind::Message, "m1");
        let channel = EntityId::with_suffix(EntityKind::Channel, "c1");
        let part = MessagePart::new(EntityId::part_of(&id, "p1"), "text/plain", None);
        Message::new(id, channel, vec![part])
    }

    #[test]
    fn test_add_part_rejects_duplicate_id() {
        let mut msg = message();
        let dup = msg.parts[0].clone();
        assert!(!msg.add_part(dup));
        assert_eq!(msg.parts.len(), 1);
    }

    #[test]
    fn test_remove_part() {
        let mut msg = message();
        let id = msg.parts[0].id.clone();
        assert!(msg.remove_part(&id).is_some());
        assert!(!msg.contains_part(&id));
        assert!(msg.remove_part(&id).is_none());
    }

    #[test]
    fn test_mime_attributes_wire_names() {
        let attrs = MimeAttributes {
            role: Some("root".into()),
            node_id: Some("n1".into()),
            parent_node_id: None,
        };
        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "root", "node-id": "n1" }));
    }
}

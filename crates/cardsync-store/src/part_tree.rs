//! Read-only view over the node tree encoded in a message's part attributes.
//!
//! Parts are a flat list; `node-id` and `parent-node-id` arrange them into a
//! tree.  Membership queries always look at the message's current parts so
//! callers never hold on to a stale list.

use cardsync_shared::constants::{ATTR_NODE_ID, ATTR_PARENT_NODE_ID, ATTR_ROLE};
use cardsync_shared::EntityId;

use crate::models::{Message, MessagePart};

#[derive(Debug, Clone, Copy)]
pub struct PartTree<'a> {
    message: &'a Message,
}

impl<'a> PartTree<'a> {
    pub fn new(message: &'a Message) -> Self {
        Self { message }
    }

    /// Parts whose MIME attribute `name` equals `value`.
    pub fn matching_attribute(&self, name: &str, value: &str) -> Vec<&'a MessagePart> {
        self.message
            .parts
            .iter()
            .filter(|part| {
                let attrs = &part.mime_attributes;
                let actual = match name {
                    ATTR_ROLE => attrs.role.as_deref(),
                    ATTR_NODE_ID => attrs.node_id.as_deref(),
                    ATTR_PARENT_NODE_ID => attrs.parent_node_id.as_deref(),
                    _ => None,
                };
                actual == Some(value)
            })
            .collect()
    }

    /// Direct children of the node `node_id`, in message order.
    pub fn children_of(&self, node_id: &str) -> Vec<&'a MessagePart> {
        self.matching_attribute(ATTR_PARENT_NODE_ID, node_id)
    }

    pub fn child_ids_of(&self, node_id: &str) -> Vec<EntityId> {
        self.children_of(node_id)
            .into_iter()
            .map(|part| part.id.clone())
            .collect()
    }

    pub fn by_node_id(&self, node_id: &str) -> Option<&'a MessagePart> {
        self.matching_attribute(ATTR_NODE_ID, node_id)
            .into_iter()
            .next()
    }

    pub fn with_role(&self, role: &str) -> Vec<&'a MessagePart> {
        self.matching_attribute(ATTR_ROLE, role)
    }

    /// The part tagged `root`, falling back to the first part without a parent.
    pub fn root(&self) -> Option<&'a MessagePart> {
        self.message
            .parts
            .iter()
            .find(|part| part.is_root())
            .or_else(|| {
                self.message
                    .parts
                    .iter()
                    .find(|part| part.parent_node_id().is_none())
            })
    }

    /// Resolve ids to parts, skipping ids the message no longer contains.
    pub fn resolve(&self, ids: &[EntityId]) -> Vec<&'a MessagePart> {
        ids.iter().filter_map(|id| self.message.part(id)).collect()
    }

    /// Keep only the ids still present in the message, preserving order.
    pub fn retain_present(&self, ids: &[EntityId]) -> Vec<EntityId> {
        ids.iter()
            .filter(|id| self.message.contains_part(id))
            .cloned()
            .collect()
    }
}

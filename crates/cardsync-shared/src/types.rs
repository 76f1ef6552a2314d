use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    CARD_MODEL_PREFIX, CHANNEL_PREFIX, ID_SCHEME, MESSAGE_PREFIX, PARTS_SEGMENT,
};
use crate::error::{CoreError, Result};

/// The entity kinds tracked by a client's registries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Channel,
    Message,
    CardModel,
}

impl EntityKind {
    /// Plural name used both as the URI path segment and the event prefix.
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Channel => "channels",
            Self::Message => "messages",
            Self::CardModel => "cardmodels",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Channel => CHANNEL_PREFIX,
            Self::Message => MESSAGE_PREFIX,
            Self::CardModel => CARD_MODEL_PREFIX,
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "channels" => Some(Self::Channel),
            "messages" => Some(Self::Message),
            "cardmodels" => Some(Self::CardModel),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.plural())
    }
}

/// URI-shaped entity identifier, e.g. `layer:///channels/<uuid>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Validate a raw identifier string.
    ///
    /// The id must carry the `layer:///` scheme followed by a known kind
    /// segment and a non-empty remainder.
    pub fn parse(raw: &str) -> Result<Self> {
        let rest = raw
            .strip_prefix(ID_SCHEME)
            .ok_or_else(|| CoreError::InvalidArgument(format!("missing scheme: {raw:?}")))?;

        let (segment, tail) = rest
            .split_once('/')
            .ok_or_else(|| CoreError::InvalidArgument(format!("missing path: {raw:?}")))?;

        if EntityKind::from_segment(segment).is_none() {
            return Err(CoreError::InvalidArgument(format!(
                "unknown entity kind {segment:?} in {raw:?}"
            )));
        }
        if tail.is_empty() || tail.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidArgument(format!(
                "malformed identifier: {raw:?}"
            )));
        }

        Ok(Self(raw.to_string()))
    }

    /// Validate a raw identifier and additionally require it to name `kind`.
    pub fn parse_kind(raw: &str, kind: EntityKind) -> Result<Self> {
        let id = Self::parse(raw)?;
        if id.kind() != Some(kind) || id.is_part() {
            return Err(CoreError::InvalidArgument(format!(
                "expected a {kind} identifier, got {raw:?}"
            )));
        }
        Ok(id)
    }

    /// Generate a fresh tentative identifier for `kind`.
    pub fn generate(kind: EntityKind) -> Self {
        Self::with_suffix(kind, &Uuid::new_v4().to_string())
    }

    pub fn with_suffix(kind: EntityKind, suffix: &str) -> Self {
        Self(format!("{}{}", kind.prefix(), suffix))
    }

    pub fn kind(&self) -> Option<EntityKind> {
        let rest = self.0.strip_prefix(ID_SCHEME)?;
        let segment = rest.split('/').next()?;
        EntityKind::from_segment(segment)
    }

    /// True for message-scoped part identifiers.
    pub fn is_part(&self) -> bool {
        self.0.starts_with(MESSAGE_PREFIX) && self.0.contains(PARTS_SEGMENT)
    }

    /// Last path segment of the identifier.
    pub fn suffix(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part identifier `<message id>/parts/<suffix>`.
    pub fn part_of(message_id: &EntityId, suffix: &str) -> Self {
        Self(format!("{}{}{}", message_id.0, PARTS_SEGMENT, suffix))
    }

    /// Identifier of the message that owns this part.
    pub fn owning_message(&self) -> Option<EntityId> {
        self.0
            .find(PARTS_SEGMENT)
            .map(|idx| Self(self.0[..idx].to_string()))
    }

    /// The same part moved under `message_id`.  `None` if this is not a
    /// part identifier.
    pub fn rebased_part(&self, message_id: &EntityId) -> Option<Self> {
        let idx = self.0.rfind(PARTS_SEGMENT)?;
        Some(Self::part_of(message_id, &self.0[idx + PARTS_SEGMENT.len()..]))
    }

    /// Card-model identifier derived from a root part identifier.
    ///
    /// `layer:///messages/X/parts/Y` always maps to `layer:///cardmodels/Y`.
    pub fn card_model_for_part(part_id: &EntityId) -> Self {
        let suffix = match part_id.0.rfind(PARTS_SEGMENT) {
            Some(idx) => &part_id.0[idx + PARTS_SEGMENT.len()..],
            None => part_id.suffix(),
        };
        Self::with_suffix(EntityKind::CardModel, suffix)
    }

    /// Message identifier used when a fresh card model generates its message.
    pub fn message_for_card_model(model_id: &EntityId) -> Self {
        let suffix = model_id
            .0
            .strip_prefix(CARD_MODEL_PREFIX)
            .unwrap_or_else(|| model_id.suffix());
        Self::with_suffix(EntityKind::Message, suffix)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Outcome of a successful create-or-find round trip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendResult {
    /// A new entity was created on the server.
    Created,
    /// A matching entity already existed on the server.
    Found,
}

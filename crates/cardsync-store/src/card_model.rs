//! Card models: typed views materialized over a root part and the child
//! parts hanging off its node.
//!
//! A [`CardModel`] never owns parts.  It remembers the id of its root part
//! and recomputes its child-part ids from the backing [`Message`] whenever
//! the message's parts change.  Payload parsing maps snake_case keys onto
//! the kind's typed-field table; anything unknown is kept in a side map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use cardsync_shared::case::{camel_case, snake_case};
use cardsync_shared::constants::{PARTICIPANT_DATA, PARTICIPANT_DATA_WIRE, ROLE_RESPONSE_SUMMARY};
use cardsync_shared::{CoreError, EntityId, EntityKind};

use crate::models::{Message, MessagePart};
use crate::part_tree::PartTree;
use crate::registry::{Dependent, Registrable};

// ---------------------------------------------------------------------------
// Model kinds
// ---------------------------------------------------------------------------

/// The card types this client knows how to materialize.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Text,
    Link,
    Image,
    Choice,
    /// Any JSON part; every payload key lands in the extra map.
    Generic,
}

impl ModelKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Text => "application/vnd.layer.card.text+json",
            Self::Link => "application/vnd.layer.card.link+json",
            Self::Image => "application/vnd.layer.card.image+json",
            Self::Choice => "application/vnd.layer.card.choice+json",
            Self::Generic => "application/json",
        }
    }

    /// Human-readable name, used when a card has no title.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Link => "Link",
            Self::Image => "Image",
            Self::Choice => "Choice",
            Self::Generic => "Card",
        }
    }

    /// camelCase names of the fields this kind parses into typed slots.
    pub fn typed_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Text => &["text", "title", "subtitle", "author"],
            Self::Link => &["url", "title", "description", "author", "imageUrl"],
            Self::Image => &[
                "sourceUrl",
                "previewUrl",
                "title",
                "subtitle",
                "artist",
                "width",
                "height",
            ],
            Self::Choice => &["label", "choices", "allowReselect", "selectedAnswer"],
            Self::Generic => &[],
        }
    }

    pub fn default_action(&self) -> Option<&'static str> {
        match self {
            Self::Link | Self::Image => Some("open-url"),
            _ => None,
        }
    }

    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        [Self::Text, Self::Link, Self::Image, Self::Choice, Self::Generic]
            .into_iter()
            .find(|kind| kind.mime_type() == mime_type)
    }

    /// Whether a model of this kind can bind to `part`.
    pub fn supports(&self, part: &MessagePart) -> bool {
        match self {
            Self::Generic => {
                part.mime_type == Self::Generic.mime_type() || part.mime_type.ends_with("+json")
            }
            kind => part.mime_type == kind.mime_type(),
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// What selecting a card triggers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Action {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl Action {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.event.as_deref().map_or(true, str::is_empty) && self.data.is_empty()
    }

    /// Lenient conversion from an untyped payload value.
    fn from_value(value: &Value) -> Self {
        Self {
            event: value
                .get("event")
                .and_then(Value::as_str)
                .map(str::to_string),
            data: value
                .get("data")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle of a model relative to its backing message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    /// No part, no message.
    Unbound,
    /// Message generated locally; not yet acknowledged by the server.
    BoundPending,
    BoundConfirmed,
    /// Terminal.
    Destroyed,
}

/// How a newly added message part relates to a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartAdded {
    /// The part hangs off the model's node and joined `child_part_ids`.
    Child,
    /// The part carries the model's own node id and replaced the root part.
    RootReplaced { previous: EntityId },
    Unrelated,
}

// ---------------------------------------------------------------------------
// CardModel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardModel {
    id: EntityId,
    kind: ModelKind,
    state: ModelState,
    message_id: Option<EntityId>,
    part_id: Option<EntityId>,
    node_id: Option<String>,
    parent_node_id: Option<String>,
    role: Option<String>,
    child_part_ids: Vec<EntityId>,
    action: Action,
    custom_data: Map<String, Value>,
    purpose: String,
    responses: Option<Value>,
    fields: BTreeMap<String, Value>,
    extra: BTreeMap<String, Value>,
    parse_error: Option<String>,
    #[serde(skip)]
    children: Vec<(String, CardModel)>,
}

impl CardModel {
    /// A fresh, unbound model with a provisional id.
    pub fn new(kind: ModelKind) -> Self {
        Self {
            id: EntityId::with_suffix(EntityKind::CardModel, &Uuid::new_v4().to_string()),
            kind,
            state: ModelState::Unbound,
            message_id: None,
            part_id: None,
            node_id: None,
            parent_node_id: None,
            role: None,
            child_part_ids: Vec::new(),
            action: Action::default(),
            custom_data: Map::new(),
            purpose: String::new(),
            responses: None,
            fields: BTreeMap::new(),
            extra: BTreeMap::new(),
            parse_error: None,
            children: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.assign(&camel_case(name), value.into());
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    pub fn with_custom_data(mut self, custom_data: Map<String, Value>) -> Self {
        self.custom_data = custom_data;
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    // -- accessors ---------------------------------------------------------

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn message_id(&self) -> Option<&EntityId> {
        self.message_id.as_ref()
    }

    pub fn part_id(&self) -> Option<&EntityId> {
        self.part_id.as_ref()
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn parent_node_id(&self) -> Option<&str> {
        self.parent_node_id.as_deref()
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn child_part_ids(&self) -> &[EntityId] {
        &self.child_part_ids
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn custom_data(&self) -> &Map<String, Value> {
        &self.custom_data
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn responses(&self) -> Option<&Value> {
        self.responses.as_ref()
    }

    pub fn parse_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }

    /// A typed field, falling back to the extra map.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).or_else(|| self.extra.get(name))
    }

    /// Payload keys this kind has no typed slot for.
    pub fn extra(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    pub fn is_root(&self) -> bool {
        self.parent_node_id.is_none()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == ModelState::Destroyed
    }

    pub fn title(&self) -> &str {
        self.fields
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn one_line_summary(&self) -> &str {
        match self.title() {
            "" => self.kind.label(),
            title => title,
        }
    }

    pub fn action_event(&self) -> &str {
        match self.action.event.as_deref() {
            Some(event) if !event.is_empty() => event,
            _ => self.kind.default_action().unwrap_or_default(),
        }
    }

    pub fn action_data(&self) -> &Map<String, Value> {
        &self.action.data
    }

    /// The part whose node id is this model's parent node id.
    pub fn parent_part<'m>(&self, message: &'m Message) -> Option<&'m MessagePart> {
        let parent = self.parent_node_id.as_deref()?;
        PartTree::new(message).by_node_id(parent)
    }

    /// First child part carrying `role`.
    pub fn child_part_with_role<'m>(&self, message: &'m Message, role: &str) -> Option<&'m MessagePart> {
        self.child_parts_with_role(message, role).into_iter().next()
    }

    pub fn child_parts_with_role<'m>(&self, message: &'m Message, role: &str) -> Vec<&'m MessagePart> {
        PartTree::new(message)
            .resolve(&self.child_part_ids)
            .into_iter()
            .filter(|part| part.role() == Some(role))
            .collect()
    }

    // -- metadata ------------------------------------------------------------

    /// Set a camelCase field.  Returns whether the stored value changed.
    pub fn set_field(&mut self, name: &str, value: Value) -> bool {
        self.assign(name, value)
    }

    /// Non-destructive union of `incoming` into the current action.
    ///
    /// The event is only taken if none is set, and data keys are only copied
    /// when absent.  Existing values always win.
    pub fn merge_action(&mut self, incoming: &Action) {
        if self.action.event.as_deref().map_or(true, str::is_empty) {
            self.action.event = incoming.event.clone();
        }
        for (key, value) in &incoming.data {
            if !self.action.data.contains_key(key) {
                self.action.data.insert(key.clone(), value.clone());
            }
        }
    }

    /// Nest `child` under this model; its root part gets `role` when the
    /// message is generated.
    pub fn add_child(&mut self, role: impl Into<String>, child: CardModel) {
        self.children.push((role.into(), child));
    }

    /// Wire body for this model: metadata plus populated typed fields, with
    /// snake_case keys.  Empty values are omitted.
    pub fn init_body_with_metadata(&self) -> Map<String, Value> {
        let mut body = Map::new();

        if !self.action.is_empty() {
            if let Ok(action) = serde_json::to_value(&self.action) {
                body.insert("action".into(), action);
            }
        }
        if !self.purpose.is_empty() {
            body.insert("purpose".into(), Value::String(self.purpose.clone()));
        }
        if !self.custom_data.is_empty() {
            body.insert("custom_data".into(), Value::Object(self.custom_data.clone()));
        }
        for name in self.kind.typed_fields() {
            if let Some(value) = self.fields.get(*name).filter(|v| !v.is_null()) {
                body.insert(snake_case(name), value.clone());
            }
        }

        body
    }

    /// Synthesize this model's parts, and those of its nested children, for
    /// a message with id `message_id`.
    ///
    /// The root part comes first and carries no role; each child's first
    /// part takes the role it was added with and points at this node.
    pub fn generate_parts(&mut self, message_id: &EntityId) -> Vec<MessagePart> {
        let node_id = Uuid::new_v4().to_string();
        let body = Value::Object(self.init_body_with_metadata()).to_string();
        let root = MessagePart::new(
            EntityId::part_of(message_id, self.id.suffix()),
            self.kind.mime_type(),
            Some(body),
        )
        .with_node_id(node_id.clone());

        let mut parts = vec![root];
        for (role, mut child) in std::mem::take(&mut self.children) {
            let mut child_parts = child.generate_parts(message_id);
            if let Some(first) = child_parts.first_mut() {
                first.mime_attributes.role = Some(role);
                first.mime_attributes.parent_node_id = Some(node_id.clone());
            }
            parts.extend(child_parts);
        }

        self.node_id = Some(node_id);
        parts
    }

    // -- binding -------------------------------------------------------------

    /// Attach this model to `message`, rooted at `part_id`.
    ///
    /// Derives the model id from the part id and recomputes the child parts.
    /// Fails with `UnsupportedMessage` if the part is missing or not of this
    /// model's kind; the model is left untouched in that case.
    pub fn bind(&mut self, message: &Message, part_id: Option<&EntityId>) -> Result<(), CoreError> {
        let Some(part_id) = part_id else {
            self.message_id = Some(message.id.clone());
            self.part_id = None;
            self.child_part_ids.clear();
            self.state = ModelState::BoundConfirmed;
            return Ok(());
        };

        let part = message.part(part_id).ok_or_else(|| {
            CoreError::UnsupportedMessage(format!("{part_id} is not a part of {}", message.id))
        })?;
        if !self.kind.supports(part) {
            return Err(CoreError::UnsupportedMessage(format!(
                "{} model cannot bind to {} part {part_id}",
                self.kind.label(),
                part.mime_type
            )));
        }

        self.id = EntityId::card_model_for_part(part_id);
        self.message_id = Some(message.id.clone());
        self.part_id = Some(part_id.clone());
        self.role = part.role().map(str::to_string);
        self.node_id = part.node_id().map(str::to_string);
        self.parent_node_id = part.parent_node_id().map(str::to_string);
        self.recompute_child_parts(message);
        self.state = ModelState::BoundConfirmed;
        Ok(())
    }

    /// Recompute child parts from scratch.
    pub fn recompute_child_parts(&mut self, message: &Message) {
        self.child_part_ids = match (&self.part_id, self.node_id.as_deref()) {
            (Some(_), Some(node)) => PartTree::new(message).child_ids_of(node),
            _ => Vec::new(),
        };
    }

    pub fn mark_pending(&mut self) {
        if self.state != ModelState::Destroyed {
            self.state = ModelState::BoundPending;
        }
    }

    /// Server acknowledged the generated message.
    pub fn confirm(&mut self) -> bool {
        if self.state == ModelState::BoundPending {
            self.state = ModelState::BoundConfirmed;
            return true;
        }
        false
    }

    // -- mutation handling --------------------------------------------------

    /// React to `part` having been added to the backing message.
    pub fn handle_part_added(&mut self, message: &Message, part: &MessagePart) -> PartAdded {
        self.child_part_ids = PartTree::new(message).retain_present(&self.child_part_ids);

        let Some(node) = self.node_id.as_deref() else {
            return PartAdded::Unrelated;
        };

        if part.parent_node_id() == Some(node) {
            if !self.child_part_ids.contains(&part.id) {
                self.child_part_ids.push(part.id.clone());
            }
            return PartAdded::Child;
        }

        if part.node_id() == Some(node) {
            if let Some(previous) = self.part_id.replace(part.id.clone()) {
                if previous != part.id {
                    debug!(model = %self.id, old = %previous, new = %part.id, "root part replaced");
                    return PartAdded::RootReplaced { previous };
                }
            }
        }

        PartAdded::Unrelated
    }

    /// Drop `part_id` from the child parts.  Returns whether it was a child.
    pub fn handle_part_removed(&mut self, part_id: &EntityId) -> bool {
        let before = self.child_part_ids.len();
        self.child_part_ids.retain(|id| id != part_id);
        before != self.child_part_ids.len()
    }

    /// Follow part ids that moved with a message rekey.
    pub fn rename_parts(&mut self, moved: &[(EntityId, EntityId)]) {
        for (old, new) in moved {
            if self.part_id.as_ref() == Some(old) {
                self.part_id = Some(new.clone());
            }
            for child in self.child_part_ids.iter_mut().filter(|id| *id == old) {
                *child = new.clone();
            }
        }
    }

    // -- parsing -------------------------------------------------------------

    /// Decode a part body.  An absent or blank body is an empty payload.
    pub fn parse_body(body: Option<&str>) -> Result<Map<String, Value>, CoreError> {
        let Some(body) = body.filter(|b| !b.trim().is_empty()) else {
            return Ok(Map::new());
        };
        match serde_json::from_str::<Value>(body)? {
            Value::Object(map) => Ok(map),
            _ => Err(CoreError::PayloadNotObject),
        }
    }

    /// Re-parse from the root part's current body in `message`.
    ///
    /// Returns the names of the properties that changed.  A model without a
    /// root part has nothing to parse.
    pub fn reparse(&mut self, message: &Message) -> Result<Vec<String>, CoreError> {
        let Some(part_id) = self.part_id.as_ref() else {
            return Ok(Vec::new());
        };
        let body = message.part(part_id).and_then(|p| p.body.as_deref());
        let payload = Self::parse_body(body)?;

        let tree = PartTree::new(message);
        let child_parts = tree.resolve(&self.child_part_ids);
        self.parse_message(&payload, &child_parts)
    }

    /// Apply `payload` (and any response summary among `child_parts`).
    ///
    /// Each top-level key is camel-cased and assigned to its typed slot or
    /// the extra map.  Responses are replaced only when they differ
    /// structurally from the current value.
    pub fn parse_message(
        &mut self,
        payload: &Map<String, Value>,
        child_parts: &[&MessagePart],
    ) -> Result<Vec<String>, CoreError> {
        let mut changed = Vec::new();

        let summaries: Vec<&MessagePart> = child_parts
            .iter()
            .copied()
            .filter(|part| part.role() == Some(ROLE_RESPONSE_SUMMARY))
            .collect();
        if let [summary] = summaries.as_slice() {
            if let Some(body) = summary.body.as_deref() {
                let mut data: Value = serde_json::from_str(body)?;
                if let Some(obj) = data.as_object_mut() {
                    if let Some(participants) = obj.remove(PARTICIPANT_DATA_WIRE) {
                        obj.insert(PARTICIPANT_DATA.to_string(), participants);
                    }
                }
                if self.responses.as_ref() != Some(&data) {
                    self.responses = Some(data);
                    changed.push("responses".to_string());
                }
            }
        }

        for (key, value) in payload {
            let name = camel_case(key);
            if self.assign(&name, value.clone()) {
                changed.push(name);
            }
        }

        self.parse_error = None;
        Ok(changed)
    }

    /// Record a parse failure on the model.
    pub fn mark_parse_error(&mut self, error: &CoreError) {
        self.parse_error = Some(error.to_string());
    }

    fn assign(&mut self, name: &str, value: Value) -> bool {
        match name {
            "action" => replace(&mut self.action, Action::from_value(&value)),
            "customData" => replace(
                &mut self.custom_data,
                value.as_object().cloned().unwrap_or_default(),
            ),
            "purpose" => replace(
                &mut self.purpose,
                value.as_str().map(str::to_string).unwrap_or_default(),
            ),
            typed if self.kind.typed_fields().iter().any(|f| *f == typed) => {
                insert_if_changed(&mut self.fields, typed, value)
            }
            other => insert_if_changed(&mut self.extra, other, value),
        }
    }

    /// Tear the model down.  Idempotent; returns `false` if already destroyed.
    pub fn destroy(&mut self) -> bool {
        if self.state == ModelState::Destroyed {
            return false;
        }
        self.state = ModelState::Destroyed;
        self.message_id = None;
        self.child_part_ids.clear();
        true
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

fn insert_if_changed(map: &mut BTreeMap<String, Value>, name: &str, value: Value) -> bool {
    if map.get(name) == Some(&value) {
        return false;
    }
    map.insert(name.to_string(), value);
    true
}

impl Registrable for CardModel {
    const KIND: EntityKind = EntityKind::CardModel;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn is_destroyed(&self) -> bool {
        self.state == ModelState::Destroyed
    }
}

impl Dependent for CardModel {
    fn foreign_key(&self) -> Option<&EntityId> {
        self.message_id.as_ref()
    }

    fn set_foreign_key(&mut self, key: EntityId) {
        self.message_id = Some(key);
    }
}

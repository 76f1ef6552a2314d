//! Keeping card models in step with the messages they are built on.
//!
//! Models subscribe to their root part, their child parts and their message
//! through the hub's subscription table.  Transport mutations look up the
//! subscribers of the touched source and let each model recompute its child
//! parts and reparse.

use tracing::{debug, trace, warn};

use cardsync_shared::constants::ROLE_ROOT;
use cardsync_shared::{CoreError, EntityId, EntityKind, EventName, Payload};
use cardsync_store::{
    shared, CardModel, Message, MessagePart, ModelKind, ModelState, PartAdded, PartTree,
    Registration, Shared, StoreError,
};

use crate::client::Client;
use crate::error::{ClientError, Result};

impl Client {
    /// Materialize a `kind` model over `part_id` of an existing message.
    ///
    /// The same part always yields the same instance.  Fails with
    /// `UnsupportedMessage` if the part is not of this kind.
    pub fn create_card_model(
        &mut self,
        kind: ModelKind,
        message_id: &EntityId,
        part_id: &EntityId,
    ) -> Result<Shared<CardModel>> {
        let message = self
            .messages
            .lookup(message_id)
            .ok_or_else(|| ClientError::not_found(message_id))?;

        let model_id = EntityId::card_model_for_part(part_id);
        if let Some(existing) = self.card_models.lookup(&model_id) {
            return Ok(existing);
        }

        let mut model = CardModel::new(kind);
        model.bind(&message.borrow(), Some(part_id))?;
        Ok(self.setup_model(shared(model), false))
    }

    /// Like [`create_card_model`](Self::create_card_model), with the kind
    /// picked from the part's MIME type.
    pub fn hydrate_card_model(
        &mut self,
        message_id: &EntityId,
        part_id: &EntityId,
    ) -> Result<Shared<CardModel>> {
        let mime_type = {
            let message = self
                .messages
                .lookup(message_id)
                .ok_or_else(|| ClientError::not_found(message_id))?;
            let message = message.borrow();
            let part = message.part(part_id).ok_or_else(|| StoreError::PartNotFound {
                message: message_id.clone(),
                part: part_id.clone(),
            })?;
            part.mime_type.clone()
        };
        let kind = ModelKind::from_mime_type(&mime_type).unwrap_or(ModelKind::Generic);
        self.create_card_model(kind, message_id, part_id)
    }

    /// Hydrate the model for a message's root part.
    pub fn hydrate_root(&mut self, message_id: &EntityId) -> Result<Shared<CardModel>> {
        let root = {
            let message = self
                .messages
                .lookup(message_id)
                .ok_or_else(|| ClientError::not_found(message_id))?;
            let message = message.borrow();
            let root = PartTree::new(&message).root().map(|part| part.id.clone());
            root
        };
        let root = root.ok_or_else(|| {
            CoreError::UnsupportedMessage(format!("{message_id} has no root part"))
        })?;
        self.hydrate_card_model(message_id, &root)
    }

    /// Register a bound model and wire its subscriptions.
    ///
    /// If the store already holds an instance for this id (or a root model
    /// for this message), that instance is returned and `model` is dropped.
    pub(crate) fn setup_model(
        &mut self,
        model: Shared<CardModel>,
        do_not_parse: bool,
    ) -> Shared<CardModel> {
        if let Registration::Existing(existing) = self.card_models.register(&model, &mut self.hub) {
            return existing;
        }

        let (id, message_id, part_id, children) = {
            let m = model.borrow();
            (
                m.id().clone(),
                m.message_id().cloned(),
                m.part_id().cloned(),
                m.child_part_ids().to_vec(),
            )
        };

        if let Some(part_id) = &part_id {
            self.hub.subscriptions.subscribe(part_id, &id);
            for child in &children {
                self.hub.subscriptions.subscribe(child, &id);
            }
        }
        if let Some(message_id) = &message_id {
            self.hub.subscriptions.subscribe(message_id, &id);
        }

        if !do_not_parse {
            if let (Some(message_id), Some(part_id)) = (&message_id, &part_id) {
                self.fetch_missing_content(message_id, part_id);
            }
            self.reparse_model(&model);
        }

        debug!(model = %id, children = children.len(), "card model set up");
        model
    }

    fn fetch_missing_content(&mut self, message_id: &EntityId, part_id: &EntityId) {
        if !self.config().fetch_missing_content {
            return;
        }
        let Some(message) = self.messages.lookup(message_id) else {
            return;
        };
        let missing = match message.borrow().part(part_id) {
            Some(part) => !part.has_content(),
            None => false,
        };
        if missing && self.begin_request(part_id) {
            trace!(part = %part_id, "fetching part content");
            self.loader.fetch_part_content(message_id, part_id);
        }
    }

    /// Reparse `model` from its message and queue the outcome.
    pub(crate) fn reparse_model(&mut self, model: &Shared<CardModel>) {
        let (id, message_id) = {
            let m = model.borrow();
            (m.id().clone(), m.message_id().cloned())
        };
        let Some(message) = message_id.and_then(|mid| self.messages.lookup(&mid)) else {
            return;
        };

        let result = model.borrow_mut().reparse(&message.borrow());
        match result {
            Ok(changed) if changed.is_empty() => {}
            Ok(changed) => self.queue_change(&id, changed),
            Err(err) => {
                warn!(model = %id, error = %err, "failed to parse card payload");
                model.borrow_mut().mark_parse_error(&err);
                self.trigger_with(
                    EntityKind::CardModel,
                    EventName::ParseError,
                    &id,
                    Payload::Error(err.to_string()),
                );
            }
        }
    }

    fn queue_change(&mut self, id: &EntityId, changed: Vec<String>) {
        self.trigger_with(
            EntityKind::CardModel,
            EventName::Change,
            id,
            Payload::Changes(changed),
        );
    }

    /// Recompute child parts and reparse every model built on `message_id`.
    ///
    /// Root parts still without a body are requested again unless a fetch
    /// for them is already in flight.
    pub(crate) fn refresh_models(&mut self, message_id: &EntityId) {
        let Some(message) = self.messages.lookup(message_id) else {
            return;
        };
        for model in self.card_models.models_for_message(message_id) {
            model.borrow_mut().recompute_child_parts(&message.borrow());
            let (id, part_id, children) = {
                let m = model.borrow();
                (m.id().clone(), m.part_id().cloned(), m.child_part_ids().to_vec())
            };
            for child in &children {
                self.hub.subscriptions.subscribe(child, &id);
            }
            if let Some(part_id) = &part_id {
                self.fetch_missing_content(message_id, part_id);
            }
            self.reparse_model(&model);
        }
    }

    /// Build a new message for an unbound `model` in `channel_id`.
    ///
    /// Parts are generated bottom-up, the root part is tagged `root`, and only
    /// then is the message created and the model bound to it.  The model
    /// stays `BoundPending` until [`message_sent`](Client::message_sent).
    pub fn generate_message(
        &mut self,
        mut model: CardModel,
        channel_id: &EntityId,
    ) -> Result<Shared<CardModel>> {
        if model.state() != ModelState::Unbound {
            return Err(ClientError::AlreadyBound(model.id().clone()));
        }

        let message_id = EntityId::message_for_card_model(model.id());
        let mut parts = model.generate_parts(&message_id);
        if let Some(root) = parts.first_mut() {
            root.mime_attributes.role = Some(ROLE_ROOT.to_string());
        }
        let root_part = parts.first().map(|part| part.id.clone());

        let message = self.add_message(Message::new(message_id, channel_id.clone(), parts));
        model.bind(&message.borrow(), root_part.as_ref())?;
        model.mark_pending();
        Ok(self.setup_model(shared(model), true))
    }

    /// Hydrate the first child model whose root part carries `role`.
    pub fn model_from_part(
        &mut self,
        model_id: &EntityId,
        role: &str,
    ) -> Result<Option<Shared<CardModel>>> {
        let mut models = self.child_models(model_id, role, true)?;
        Ok(models.pop())
    }

    /// Hydrate every child model whose root part carries `role`.
    pub fn models_from_part(
        &mut self,
        model_id: &EntityId,
        role: &str,
    ) -> Result<Vec<Shared<CardModel>>> {
        self.child_models(model_id, role, false)
    }

    fn child_models(
        &mut self,
        model_id: &EntityId,
        role: &str,
        first_only: bool,
    ) -> Result<Vec<Shared<CardModel>>> {
        let parent = self
            .card_models
            .lookup(model_id)
            .ok_or_else(|| ClientError::not_found(model_id))?;
        let message_id = parent.borrow().message_id().cloned();
        let Some(message_id) = message_id else {
            return Ok(Vec::new());
        };
        let message = self
            .messages
            .lookup(&message_id)
            .ok_or_else(|| ClientError::not_found(&message_id))?;

        let mut part_ids: Vec<EntityId> = parent
            .borrow()
            .child_parts_with_role(&message.borrow(), role)
            .into_iter()
            .map(|part| part.id.clone())
            .collect();
        if first_only {
            part_ids.truncate(1);
        }

        part_ids
            .iter()
            .map(|part_id| self.hydrate_card_model(&message_id, part_id))
            .collect()
    }

    /// Apply a part added by the transport.  Duplicate ids are ignored.
    pub fn part_added(&mut self, message_id: &EntityId, part: MessagePart) -> Result<bool> {
        let message = self
            .messages
            .lookup(message_id)
            .ok_or_else(|| ClientError::not_found(message_id))?;
        let part_id = part.id.clone();
        let added = message.borrow_mut().add_part(part.clone());
        if !added {
            debug!(part = %part_id, "part already present");
            return Ok(false);
        }

        for subscriber in self.hub.subscriptions.subscribers(message_id) {
            let Some(model) = self.card_models.lookup(&subscriber) else {
                continue;
            };
            let outcome = model.borrow_mut().handle_part_added(&message.borrow(), &part);
            match outcome {
                PartAdded::Child => {
                    self.hub.subscriptions.subscribe(&part_id, &subscriber);
                }
                PartAdded::RootReplaced { previous } => {
                    self.hub.subscriptions.unsubscribe(&previous, &subscriber);
                    self.hub.subscriptions.subscribe(&part_id, &subscriber);
                }
                PartAdded::Unrelated => {
                    self.reparse_model(&model);
                    continue;
                }
            }
            self.reparse_model(&model);
            self.queue_change(&subscriber, Vec::new());
        }
        Ok(true)
    }

    /// Apply a part removed by the transport.
    pub fn part_removed(&mut self, message_id: &EntityId, part_id: &EntityId) -> Result<bool> {
        let message = self
            .messages
            .lookup(message_id)
            .ok_or_else(|| ClientError::not_found(message_id))?;
        let removed = message.borrow_mut().remove_part(part_id);
        if removed.is_none() {
            return Ok(false);
        }

        for subscriber in self.hub.subscriptions.subscribers(message_id) {
            let Some(model) = self.card_models.lookup(&subscriber) else {
                continue;
            };
            let was_child = model.borrow_mut().handle_part_removed(part_id);
            self.reparse_model(&model);
            if was_child {
                self.queue_change(&subscriber, vec!["childParts".to_string()]);
            }
        }
        self.hub.subscriptions.detach_source(part_id);
        self.in_flight.remove(part_id);
        Ok(true)
    }

    /// A part body changed or finished loading.
    pub fn part_content_changed(
        &mut self,
        message_id: &EntityId,
        part_id: &EntityId,
        body: Option<String>,
    ) -> Result<()> {
        self.in_flight.remove(part_id);
        let message = self
            .messages
            .lookup(message_id)
            .ok_or_else(|| ClientError::not_found(message_id))?;
        {
            let mut message = message.borrow_mut();
            let part = message
                .part_mut(part_id)
                .ok_or_else(|| StoreError::PartNotFound {
                    message: message_id.clone(),
                    part: part_id.clone(),
                })?;
            part.body = body;
        }

        for subscriber in self.hub.subscriptions.subscribers(part_id) {
            if let Some(model) = self.card_models.lookup(&subscriber) {
                self.reparse_model(&model);
            }
        }
        Ok(())
    }

    /// A requested part body could not be fetched.  The part may be
    /// requested again on the next refresh of its message.
    pub fn part_fetch_failed(
        &mut self,
        message_id: &EntityId,
        part_id: &EntityId,
        error: impl Into<String>,
    ) {
        let error = error.into();
        if self.in_flight.remove(part_id) {
            warn!(message_id = %message_id, part = %part_id, error = %error, "part fetch failed");
        }
    }

    /// Destroy a registered model.  Its message is left alone.
    pub fn destroy_card_model(&mut self, id: &EntityId) -> bool {
        let Some(model) = self.card_models.unregister(id, &mut self.hub) else {
            return false;
        };
        let destroyed = model.borrow_mut().destroy();
        debug!(model = %id, "card model destroyed");
        destroyed
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::collaborators::recording::RecordingLoader;
    use crate::config::ClientConfig;
    use cardsync_shared::constants::ROLE_RESPONSE_SUMMARY;
    use cardsync_shared::Notification;
    use cardsync_store::{Action, Channel};

    const TEXT: &str = "application/vnd.layer.card.text+json";

    struct Fixture {
        client: Client,
        message: EntityId,
        root: EntityId,
    }

    fn fixture_with(client: Client, body: Option<&str>) -> Fixture {
        let mut client = client;
        let channel = client.add_channel(Channel::placeholder(EntityId::with_suffix(
            EntityKind::Channel,
            "c",
        )));
        let channel_id = channel.borrow().id.clone();

        let message = EntityId::with_suffix(EntityKind::Message, "m");
        let root = EntityId::part_of(&message, "root");
        let parts = vec![MessagePart::new(root.clone(), TEXT, body.map(String::from))
            .with_role(ROLE_ROOT)
            .with_node_id("n0")];
        client.add_message(Message::new(message.clone(), channel_id, parts));
        client.flush();
        Fixture {
            client,
            message,
            root,
        }
    }

    fn fixture(body: &str) -> Fixture {
        fixture_with(Client::new(ClientConfig::default()), Some(body))
    }

    fn changes(delivered: &[Notification]) -> Vec<&Notification> {
        delivered.iter().filter(|n| n.name() == "change").collect()
    }

    #[test]
    fn test_hydrate_derives_id_and_parses() {
        let mut f = fixture(r#"{"text":"hello","custom_field":1}"#);
        let model = f.client.hydrate_card_model(&f.message, &f.root).unwrap();

        {
            let m = model.borrow();
            assert_eq!(m.id().as_str(), "layer:///cardmodels/root");
            assert_eq!(m.kind(), ModelKind::Text);
            assert_eq!(m.state(), ModelState::BoundConfirmed);
            assert_eq!(m.role(), Some(ROLE_ROOT));
            assert_eq!(m.field("text"), Some(&json!("hello")));
            assert_eq!(m.extra().get("customField"), Some(&json!(1)));
        }

        let again = f.client.hydrate_card_model(&f.message, &f.root).unwrap();
        assert!(Rc::ptr_eq(&model, &again));

        let delivered = f.client.flush();
        assert!(delivered
            .iter()
            .any(|n| n.kind == EntityKind::CardModel && n.event == EventName::Add));
        assert_eq!(changes(&delivered).len(), 1);
    }

    #[test]
    fn test_unsupported_kind_is_rejected() {
        let mut f = fixture("{}");
        let err = f
            .client
            .create_card_model(ModelKind::Choice, &f.message, &f.root)
            .unwrap_err();
        assert!(matches!(err, ClientError::Core(CoreError::UnsupportedMessage(_))));
        assert!(f.client.card_models().is_empty());
    }

    #[test]
    fn test_unchanged_reparse_is_silent() {
        let mut f = fixture(r#"{"text":"same"}"#);
        f.client.hydrate_root(&f.message).unwrap();
        f.client.flush();

        let body = Some(r#"{"text":"same"}"#.to_string());
        f.client
            .part_content_changed(&f.message, &f.root, body.clone())
            .unwrap();
        f.client.part_content_changed(&f.message, &f.root, body).unwrap();
        assert!(changes(&f.client.flush()).is_empty());
    }

    #[test]
    fn test_five_mutations_deliver_one_change() {
        let mut f = fixture("{}");
        let model = f.client.hydrate_root(&f.message).unwrap();
        f.client.flush();

        for i in 0..5 {
            let body = json!({ "text": format!("v{i}") }).to_string();
            f.client
                .part_content_changed(&f.message, &f.root, Some(body))
                .unwrap();
        }

        let delivered = f.client.flush();
        let change_events = changes(&delivered);
        assert_eq!(change_events.len(), 1);
        assert_eq!(change_events[0].target, *model.borrow().id());
        assert_eq!(model.borrow().field("text"), Some(&json!("v4")));
    }

    #[test]
    fn test_child_part_added_and_removed() {
        let mut f = fixture(r#"{"text":"t"}"#);
        let model = f.client.hydrate_root(&f.message).unwrap();
        f.client.flush();

        let child = EntityId::part_of(&f.message, "child");
        let part = MessagePart::new(child.clone(), TEXT, Some("{}".into()))
            .with_node_id("n1")
            .with_parent_node_id("n0");
        assert!(f.client.part_added(&f.message, part.clone()).unwrap());
        assert!(!f.client.part_added(&f.message, part).unwrap());

        assert_eq!(model.borrow().child_part_ids(), &[child.clone()]);
        assert!(f
            .client
            .hub
            .subscriptions
            .is_subscribed(&child, model.borrow().id()));
        assert_eq!(changes(&f.client.flush()).len(), 1);

        assert!(f.client.part_removed(&f.message, &child).unwrap());
        assert!(model.borrow().child_part_ids().is_empty());
        assert!(f.client.hub.subscriptions.subscribers(&child).is_empty());
    }

    #[test]
    fn test_root_part_replacement() {
        let mut f = fixture(r#"{"text":"old"}"#);
        let model = f.client.hydrate_root(&f.message).unwrap();
        let model_id = model.borrow().id().clone();
        f.client.flush();

        let replacement = EntityId::part_of(&f.message, "root2");
        let part = MessagePart::new(replacement.clone(), TEXT, Some(r#"{"text":"new"}"#.into()))
            .with_node_id("n0");
        f.client.part_added(&f.message, part).unwrap();

        assert_eq!(model.borrow().part_id(), Some(&replacement));
        assert_eq!(model.borrow().field("text"), Some(&json!("new")));
        let subs = &f.client.hub.subscriptions;
        assert!(subs.is_subscribed(&replacement, &model_id));
        assert!(!subs.is_subscribed(&f.root, &model_id));
        assert_eq!(changes(&f.client.flush()).len(), 1);
    }

    #[test]
    fn test_response_summary_updates_responses() {
        let mut f = fixture("{}");
        let model = f.client.hydrate_root(&f.message).unwrap();
        f.client.flush();

        let summary = EntityId::part_of(&f.message, "summary");
        let body = json!({ "participant_data": { "alice": { "selection": "a" } } }).to_string();
        let part = MessagePart::new(summary.clone(), "application/json", Some(body))
            .with_role(ROLE_RESPONSE_SUMMARY)
            .with_parent_node_id("n0");
        f.client.part_added(&f.message, part).unwrap();

        let expected = json!({ "participantData": { "alice": { "selection": "a" } } });
        assert_eq!(model.borrow().responses(), Some(&expected));

        let delivered = f.client.flush();
        let change_events = changes(&delivered);
        assert_eq!(change_events.len(), 1);
        assert_eq!(change_events[0].payload, Payload::Changes(vec!["responses".into()]));

        let same = json!({ "participant_data": { "alice": { "selection": "a" } } }).to_string();
        f.client
            .part_content_changed(&f.message, &summary, Some(same))
            .unwrap();
        assert!(changes(&f.client.flush()).is_empty());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let mut f = fixture("{}");
        let model = f.client.hydrate_root(&f.message).unwrap();
        f.client.flush();

        f.client
            .part_content_changed(&f.message, &f.root, Some("{not json".into()))
            .unwrap();
        assert!(model.borrow().parse_error().is_some());

        let delivered = f.client.flush();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].name(), "parse-error");
        assert!(matches!(delivered[0].payload, Payload::Error(_)));

        f.client
            .part_content_changed(&f.message, &f.root, Some(r#"{"text":"ok"}"#.into()))
            .unwrap();
        assert!(model.borrow().parse_error().is_none());
    }

    #[test]
    fn test_malformed_summary_reports_parse_error() {
        let mut f = fixture(r#"{"text":"t"}"#);
        let model = f.client.hydrate_root(&f.message).unwrap();

        let summary = EntityId::part_of(&f.message, "summary");
        let body = json!({ "participant_data": { "bob": { "selection": "b" } } }).to_string();
        let part = MessagePart::new(summary.clone(), "application/json", Some(body))
            .with_role(ROLE_RESPONSE_SUMMARY)
            .with_parent_node_id("n0");
        f.client.part_added(&f.message, part).unwrap();
        f.client.flush();
        let responses = model.borrow().responses().cloned();
        assert!(responses.is_some());

        f.client
            .part_content_changed(&f.message, &summary, Some("{bad".into()))
            .unwrap();
        {
            let m = model.borrow();
            assert!(m.parse_error().is_some());
            assert_eq!(m.responses().cloned(), responses);
            assert_eq!(m.field("text"), Some(&json!("t")));
        }

        let delivered = f.client.flush();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].name(), "parse-error");
        assert!(changes(&delivered).is_empty());
    }

    #[test]
    fn test_missing_body_is_fetched_once() {
        let loader = RecordingLoader::default();
        let client = Client::new(ClientConfig::default()).with_loader(loader.clone());
        let mut f = fixture_with(client, None);

        let model = f.client.hydrate_root(&f.message).unwrap();
        assert_eq!(*loader.fetches.borrow(), vec![f.root.clone()]);
        assert!(model.borrow().field("text").is_none());

        f.client
            .part_content_changed(&f.message, &f.root, Some(r#"{"text":"late"}"#.into()))
            .unwrap();
        assert_eq!(model.borrow().field("text"), Some(&json!("late")));
        assert_eq!(loader.fetches.borrow().len(), 1);
    }

    #[test]
    fn test_failed_fetch_is_requested_again() {
        let loader = RecordingLoader::default();
        let client = Client::new(ClientConfig::default()).with_loader(loader.clone());
        let mut f = fixture_with(client, None);

        f.client.hydrate_root(&f.message).unwrap();
        f.client.refresh_models(&f.message);
        assert_eq!(loader.fetches.borrow().len(), 1);

        f.client.part_fetch_failed(&f.message, &f.root, "timeout");
        f.client.refresh_models(&f.message);
        assert_eq!(*loader.fetches.borrow(), vec![f.root.clone(), f.root.clone()]);
    }

    #[test]
    fn test_destroying_message_destroys_models_only_once() {
        let mut f = fixture(r#"{"text":"t"}"#);
        let model = f.client.hydrate_root(&f.message).unwrap();
        let model_id = model.borrow().id().clone();
        f.client.flush();

        f.client
            .part_content_changed(&f.message, &f.root, Some(r#"{"text":"u"}"#.into()))
            .unwrap();
        assert!(f.client.remove_message(&f.message));
        assert_eq!(model.borrow().state(), ModelState::Destroyed);
        assert!(model.borrow().message_id().is_none());
        assert!(!f.client.destroy_card_model(&model_id));
        assert!(f.client.hub.subscriptions.is_empty());

        let delivered = f.client.flush();
        assert!(changes(&delivered).is_empty());
        assert!(delivered
            .iter()
            .any(|n| n.kind == EntityKind::CardModel && n.event == EventName::Remove));
    }

    #[test]
    fn test_destroy_model_keeps_message() {
        let mut f = fixture("{}");
        let model = f.client.hydrate_root(&f.message).unwrap();
        let model_id = model.borrow().id().clone();

        assert!(f.client.destroy_card_model(&model_id));
        assert!(!f.client.destroy_card_model(&model_id));
        assert!(f.client.messages().contains(&f.message));
        assert!(f.client.card_models().lookup(&model_id).is_none());
    }

    #[test]
    fn test_generate_message_then_sent() {
        let mut client = Client::new(ClientConfig::default());
        let channel = client.create_channel(Vec::new(), Default::default());
        let channel_id = channel.borrow().id.clone();

        let mut model = CardModel::new(ModelKind::Link)
            .with_field("url", "https://example.com")
            .with_field("title", "Example")
            .with_action(Action::new("open-url").with_data("url", "x"));
        model.merge_action(&Action::new("ignored").with_data("url", "y").with_data("other", "z"));
        model.add_child(
            "option",
            CardModel::new(ModelKind::Choice).with_field("label", "Pick"),
        );
        let expected_id = model.id().clone();

        let model = client.generate_message(model, &channel_id).unwrap();
        let message_id = model.borrow().message_id().cloned().unwrap();
        {
            let m = model.borrow();
            assert_eq!(m.id(), &expected_id);
            assert_eq!(m.state(), ModelState::BoundPending);
            assert_eq!(m.role(), Some(ROLE_ROOT));
            assert_eq!(m.child_part_ids().len(), 1);
            assert_eq!(m.action_event(), "open-url");
            assert_eq!(m.action_data().get("url"), Some(&json!("x")));
            assert_eq!(m.action_data().get("other"), Some(&json!("z")));
        }
        assert_eq!(message_id, EntityId::message_for_card_model(&expected_id));

        let message = client.messages().lookup(&message_id).unwrap();
        {
            let msg = message.borrow();
            let root = PartTree::new(&msg).root().unwrap();
            let body = CardModel::parse_body(root.body.as_deref()).unwrap();
            assert_eq!(body.get("url"), Some(&json!("https://example.com")));
            assert_eq!(msg.parent_id, channel_id);
        }

        let child = client.model_from_part(&expected_id, "option").unwrap().unwrap();
        assert_eq!(child.borrow().kind(), ModelKind::Choice);
        assert_eq!(child.borrow().field("label"), Some(&json!("Pick")));
        assert_eq!(client.models_from_part(&expected_id, "option").unwrap().len(), 1);

        let confirmed = EntityId::with_suffix(EntityKind::Message, "server");
        client.message_sent(&message_id, Some(confirmed.clone())).unwrap();
        assert_eq!(model.borrow().state(), ModelState::BoundConfirmed);
        assert_eq!(model.borrow().message_id(), Some(&confirmed));
        assert!(client.messages().lookup(&message_id).is_none());

        let again = client.generate_message(
            CardModel::new(ModelKind::Text),
            &channel_id,
        );
        assert!(again.is_ok());
    }

    #[test]
    fn test_generated_message_parts_follow_confirmed_id() {
        let mut client = Client::new(ClientConfig::default());
        let channel = client.create_channel(Vec::new(), Default::default());
        let channel_id = channel.borrow().id.clone();

        let model = client
            .generate_message(CardModel::new(ModelKind::Text).with_field("text", "hi"), &channel_id)
            .unwrap();
        let (model_id, tentative, old_part) = {
            let m = model.borrow();
            (m.id().clone(), m.message_id().cloned().unwrap(), m.part_id().cloned().unwrap())
        };

        let confirmed = EntityId::with_suffix(EntityKind::Message, "server");
        client.message_sent(&tentative, Some(confirmed.clone())).unwrap();
        client.flush();

        let new_part = EntityId::part_of(&confirmed, old_part.suffix());
        assert_eq!(model.borrow().part_id(), Some(&new_part));
        assert_eq!(model.borrow().id(), &model_id);
        assert!(Rc::ptr_eq(&client.card_models().lookup(&model_id).unwrap(), &model));
        assert!(client.hub.subscriptions.is_subscribed(&new_part, &model_id));
        assert!(!client.hub.subscriptions.is_subscribed(&old_part, &model_id));

        client
            .part_content_changed(&confirmed, &new_part, Some(r#"{"text":"edited"}"#.into()))
            .unwrap();
        assert_eq!(model.borrow().field("text"), Some(&json!("edited")));
        assert_eq!(model.borrow().state(), ModelState::BoundConfirmed);
        assert_eq!(changes(&client.flush()).len(), 1);
    }

    #[test]
    fn test_generate_message_rejects_bound_model() {
        let mut f = fixture("{}");
        let model = f.client.hydrate_root(&f.message).unwrap();
        let bound = model.borrow().clone();
        let channel = EntityId::with_suffix(EntityKind::Channel, "c");
        assert!(matches!(
            f.client.generate_message(bound, &channel),
            Err(ClientError::AlreadyBound(_))
        ));
    }

    #[test]
    fn test_second_root_model_reuses_first() {
        let mut f = fixture("{}");
        let first = f.client.hydrate_root(&f.message).unwrap();

        let other = EntityId::part_of(&f.message, "other-root");
        let part = MessagePart::new(other.clone(), TEXT, Some("{}".into())).with_node_id("nx");
        f.client.part_added(&f.message, part).unwrap();

        let second = f.client.hydrate_card_model(&f.message, &other).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }
}

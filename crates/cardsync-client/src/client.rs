//! The client context: owns every store, the notification hub and the
//! external collaborators, and implements the channel/message cascades.
//!
//! Card-model synchronization lives in [`crate::card_sync`] as a second
//! `impl Client` block.

use std::collections::HashSet;
use std::rc::Rc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use cardsync_shared::{
    CoreError, EntityId, EntityKind, EventName, Notification, Payload, SendResult,
};
use cardsync_store::{
    shared, CardModelStore, Channel, ChannelData, ChannelStore, ChannelUpdate, EventHub, Message,
    MessageData, MessageStore, Rekey, Shared, SyncState,
};

use crate::collaborators::{CacheEvictor, Loader, NoopEvictor, NoopLoader};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{ListenerId, Listeners};

pub struct Client {
    config: ClientConfig,
    pub(crate) channels: ChannelStore,
    pub(crate) messages: MessageStore,
    pub(crate) card_models: CardModelStore,
    pub(crate) hub: EventHub,
    pub(crate) loader: Box<dyn Loader>,
    evictor: Box<dyn CacheEvictor>,
    listeners: Listeners,
    /// Loads and part fetches that have been requested but not answered.
    /// Entries survive eviction; only an answer clears them.
    pub(crate) in_flight: HashSet<EntityId>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let owner = config.app_id.clone();
        info!(app_id = %owner, "cardsync client created");
        Self {
            channels: ChannelStore::new(owner.clone()),
            messages: MessageStore::new(owner.clone()),
            card_models: CardModelStore::new(owner),
            hub: EventHub::new(),
            loader: Box::new(NoopLoader),
            evictor: Box::new(NoopEvictor),
            listeners: Listeners::new(),
            in_flight: HashSet::new(),
            config,
        }
    }

    pub fn with_loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_evictor(mut self, evictor: impl CacheEvictor + 'static) -> Self {
        self.evictor = Box::new(evictor);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn app_id(&self) -> &str {
        &self.config.app_id
    }

    pub fn channels(&self) -> &ChannelStore {
        &self.channels
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn card_models(&self) -> &CardModelStore {
        &self.card_models
    }

    /// Number of notifications waiting for the next [`flush`](Self::flush).
    pub fn pending_notifications(&self) -> usize {
        self.hub.queue.len()
    }

    pub fn on<F>(&mut self, name: &str, callback: F) -> ListenerId
    where
        F: FnMut(&Notification) + 'static,
    {
        self.listeners.on(name, callback)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.listeners.off(id)
    }

    // -- notification delivery ------------------------------------------------

    /// Deliver everything queued during the current batch.
    ///
    /// Entity-scoped notifications whose target is no longer registered are
    /// dropped; repeated `change`s collapse.  Returns what was delivered.
    pub fn flush(&mut self) -> Vec<Notification> {
        let channels = &self.channels;
        let messages = &self.messages;
        let card_models = &self.card_models;
        let delivered = self.hub.queue.flush(|kind, id| match kind {
            EntityKind::Channel => channels.contains(id),
            EntityKind::Message => messages.contains(id),
            EntityKind::CardModel => card_models.contains(id),
        });

        for notification in &delivered {
            self.listeners.emit(notification);
        }
        delivered
    }

    pub(crate) fn trigger(&mut self, kind: EntityKind, event: EventName, id: &EntityId) {
        self.hub.trigger(kind, event, id);
    }

    pub(crate) fn trigger_with(
        &mut self,
        kind: EntityKind,
        event: EventName,
        id: &EntityId,
        payload: Payload,
    ) {
        self.hub
            .queue
            .trigger_async(Notification::new(kind, event, id.clone()).with_payload(payload));
    }

    /// Ask the loader for `id` unless the same request is already pending.
    fn request_load(&mut self, kind: EntityKind, id: &EntityId) {
        if self.begin_request(id) {
            self.loader.load(kind, id);
        }
    }

    pub(crate) fn begin_request(&mut self, id: &EntityId) -> bool {
        let fresh = self.in_flight.insert(id.clone());
        if !fresh && self.config.dedup_loads {
            debug!(id = %id, "request already in flight");
            return false;
        }
        true
    }

    // -- channels -------------------------------------------------------------

    /// Cached channel for `id`, or a loading placeholder when `can_load`.
    pub fn get_channel(&mut self, id: &str, can_load: bool) -> Result<Option<Shared<Channel>>> {
        if let Some(channel) = self.channels.get(id)? {
            let loading = channel.borrow().sync_state == SyncState::Loading;
            if can_load && !loading {
                let id = channel.borrow().id.clone();
                self.trigger(EntityKind::Channel, EventName::Loaded, &id);
            }
            return Ok(Some(channel));
        }
        if !can_load {
            return Ok(None);
        }

        let id = EntityId::parse_kind(id, EntityKind::Channel)?;
        let placeholder = self.register_channel(&shared(Channel::placeholder(id.clone())));
        self.request_load(EntityKind::Channel, &id);
        Ok(Some(placeholder))
    }

    /// Register `channel`, returning the canonical instance for its id.
    pub fn add_channel(&mut self, channel: Channel) -> Shared<Channel> {
        self.register_channel(&shared(channel))
    }

    fn register_channel(&mut self, channel: &Shared<Channel>) -> Shared<Channel> {
        let id = channel.borrow().id.clone();
        if self.channels.register(channel, &mut self.hub) {
            self.evictor
                .schedule_check_and_purge(EntityKind::Channel, &id);
            return Rc::clone(channel);
        }
        self.channels
            .lookup(&id)
            .unwrap_or_else(|| Rc::clone(channel))
    }

    /// Create a channel under a tentative id.
    pub fn create_channel(
        &mut self,
        participants: Vec<String>,
        metadata: Map<String, Value>,
    ) -> Shared<Channel> {
        self.add_channel(Channel::new(participants, metadata))
    }

    /// Destroy a channel and every message in it.  Absent ids are a no-op.
    pub fn remove_channel(&mut self, id: &EntityId) -> bool {
        let Some(channel) = self.channels.unregister(id, &mut self.hub) else {
            return false;
        };
        channel.borrow_mut().is_destroyed = true;

        let dependents = self.messages.dependents_of(id);
        for message in &dependents {
            let message_id = message.borrow().id.clone();
            self.remove_message(&message_id);
        }
        debug!(channel = %id, messages = dependents.len(), "channel destroyed");
        true
    }

    /// Move a channel to its server-confirmed id.
    pub fn update_channel_id(&mut self, old: &EntityId, new: EntityId) -> Result<()> {
        let channel = self
            .channels
            .lookup(old)
            .ok_or_else(|| ClientError::not_found(old))?;
        channel.borrow_mut().id = new.clone();
        if let Rekey::Displaced(previous) = self.channels.rekey(&channel, old, &mut self.hub) {
            // Messages already filed under `new` now resolve to `channel`.
            previous.borrow_mut().is_destroyed = true;
        }
        let moved = self.messages.rewrite_foreign_keys(old, &new);
        debug!(old = %old, new = %new, messages = moved, "channel rekeyed");
        Ok(())
    }

    /// The server answered a create-or-find for `tentative`.
    pub fn channel_sent(
        &mut self,
        tentative: &EntityId,
        confirmed: EntityId,
        result: SendResult,
    ) -> Result<()> {
        if &confirmed != tentative {
            self.update_channel_id(tentative, confirmed.clone())?;
        }
        let channel = self
            .channels
            .lookup(&confirmed)
            .ok_or_else(|| ClientError::not_found(&confirmed))?;
        {
            let mut channel = channel.borrow_mut();
            channel.sync_state = SyncState::Synced;
            if channel.created_at.is_none() {
                channel.created_at = Some(Utc::now());
            }
        }
        self.trigger_with(
            EntityKind::Channel,
            EventName::Sent,
            &confirmed,
            Payload::Sent(result),
        );
        Ok(())
    }

    /// The server rejected a create-or-find.  Not retried.
    pub fn channel_send_failed(&mut self, id: &EntityId, error: impl Into<String>) {
        let rejection = CoreError::Rejected(error.into());
        warn!(channel = %id, error = %rejection, "channel create rejected");
        self.trigger_with(
            EntityKind::Channel,
            EventName::SentError,
            id,
            Payload::Error(rejection.to_string()),
        );
    }

    /// The server deleted the channel.
    pub fn channel_deleted(&mut self, id: &EntityId) -> bool {
        if !self.channels.contains(id) {
            return false;
        }
        self.trigger(EntityKind::Channel, EventName::Delete, id);
        self.remove_channel(id)
    }

    /// Apply a partial update; queues `channels:change` when anything changed.
    pub fn update_channel(&mut self, id: &EntityId, update: ChannelUpdate) -> Result<Vec<String>> {
        let channel = self
            .channels
            .lookup(id)
            .ok_or_else(|| ClientError::not_found(id))?;
        let changed = channel.borrow_mut().apply_update(update);
        if !changed.is_empty() {
            self.trigger_with(
                EntityKind::Channel,
                EventName::Change,
                id,
                Payload::Changes(changed.clone()),
            );
        }
        Ok(changed)
    }

    pub fn complete_channel_load(&mut self, id: &EntityId, data: ChannelData) -> Shared<Channel> {
        self.in_flight.remove(id);
        let channel = match self.channels.lookup(id) {
            Some(channel) => channel,
            None => self.register_channel(&shared(Channel::placeholder(id.clone()))),
        };
        channel.borrow_mut().populate(data);
        self.trigger(EntityKind::Channel, EventName::Loaded, id);
        channel
    }

    pub fn channel_load_failed(&mut self, id: &EntityId, error: impl Into<String>) {
        self.in_flight.remove(id);
        if !self.channels.contains(id) {
            return;
        }
        let error = error.into();
        warn!(channel = %id, error = %error, "channel load failed");
        self.trigger_with(
            EntityKind::Channel,
            EventName::LoadedError,
            id,
            Payload::Error(error),
        );
        self.remove_channel(id);
    }

    // -- messages -------------------------------------------------------------

    pub fn get_message(&mut self, id: &str, can_load: bool) -> Result<Option<Shared<Message>>> {
        if let Some(message) = self.messages.get(id)? {
            let loading = message.borrow().sync_state == SyncState::Loading;
            if can_load && !loading {
                let id = message.borrow().id.clone();
                self.trigger(EntityKind::Message, EventName::Loaded, &id);
            }
            return Ok(Some(message));
        }
        if !can_load {
            return Ok(None);
        }

        let id = EntityId::parse_kind(id, EntityKind::Message)?;
        let placeholder = self.register_message(&shared(Message::placeholder(id.clone())));
        self.request_load(EntityKind::Message, &id);
        Ok(Some(placeholder))
    }

    pub fn add_message(&mut self, message: Message) -> Shared<Message> {
        self.register_message(&shared(message))
    }

    fn register_message(&mut self, message: &Shared<Message>) -> Shared<Message> {
        let id = message.borrow().id.clone();
        if self.messages.register(message, &mut self.hub) {
            self.evictor
                .schedule_check_and_purge(EntityKind::Message, &id);
            return Rc::clone(message);
        }
        self.messages
            .lookup(&id)
            .unwrap_or_else(|| Rc::clone(message))
    }

    /// Destroy a message and the card models built on it.
    pub fn remove_message(&mut self, id: &EntityId) -> bool {
        let Some(message) = self.messages.lookup(id) else {
            return false;
        };

        for model in self.card_models.models_for_message(id) {
            let model_id = model.borrow().id().clone();
            self.destroy_card_model(&model_id);
        }

        let part_ids: Vec<EntityId> = message.borrow().parts.iter().map(|p| p.id.clone()).collect();
        for part_id in &part_ids {
            self.hub.subscriptions.detach_source(part_id);
        }

        self.messages.unregister(id, &mut self.hub);
        message.borrow_mut().is_destroyed = true;
        debug!(message_id = %id, "message destroyed");
        true
    }

    /// Move a message to its server-confirmed id.
    ///
    /// Parts move under the new id and their listeners, pending fetches and
    /// card-model references follow.  A different message already cached
    /// under `new` is destroyed first.
    pub fn update_message_id(&mut self, old: &EntityId, new: EntityId) -> Result<()> {
        let message = self
            .messages
            .lookup(old)
            .ok_or_else(|| ClientError::not_found(old))?;
        if let Some(previous) = self.messages.lookup(&new) {
            if !Rc::ptr_eq(&previous, &message) {
                warn!(message_id = %new, "confirmed id already cached; replacing it");
                self.remove_message(&new);
            }
        }

        let moved_parts = message.borrow_mut().rekey(new.clone());
        self.messages.rekey(&message, old, &mut self.hub);
        for (old_part, new_part) in &moved_parts {
            self.hub.subscriptions.rename_source(old_part, new_part);
            if self.in_flight.remove(old_part) {
                self.in_flight.insert(new_part.clone());
            }
        }
        let models = self.card_models.rekey_message(old, &new, &moved_parts);
        debug!(old = %old, new = %new, parts = moved_parts.len(), models, "message rekeyed");
        Ok(())
    }

    /// The server acknowledged a locally generated message.
    pub fn message_sent(&mut self, tentative: &EntityId, confirmed: Option<EntityId>) -> Result<()> {
        let id = match confirmed {
            Some(confirmed) if &confirmed != tentative => {
                self.update_message_id(tentative, confirmed.clone())?;
                confirmed
            }
            _ => tentative.clone(),
        };
        let message = self
            .messages
            .lookup(&id)
            .ok_or_else(|| ClientError::not_found(&id))?;
        {
            let mut message = message.borrow_mut();
            message.sync_state = SyncState::Synced;
            if message.sent_at.is_none() {
                message.sent_at = Some(Utc::now());
            }
        }

        let mut confirmed_models = 0usize;
        for model in self.card_models.models_for_message(&id) {
            if model.borrow_mut().confirm() {
                confirmed_models += 1;
            }
        }
        debug!(message_id = %id, models = confirmed_models, "message sent");
        self.trigger(EntityKind::Message, EventName::Sent, &id);
        Ok(())
    }

    pub fn complete_message_load(&mut self, id: &EntityId, data: MessageData) -> Shared<Message> {
        self.in_flight.remove(id);
        let message = match self.messages.lookup(id) {
            Some(message) => message,
            None => self.register_message(&shared(Message::placeholder(id.clone()))),
        };
        message.borrow_mut().populate(data);
        self.refresh_models(id);
        self.trigger(EntityKind::Message, EventName::Loaded, id);
        message
    }

    pub fn message_load_failed(&mut self, id: &EntityId, error: impl Into<String>) {
        self.in_flight.remove(id);
        if !self.messages.contains(id) {
            return;
        }
        let error = error.into();
        warn!(message_id = %id, error = %error, "message load failed");
        self.trigger_with(
            EntityKind::Message,
            EventName::LoadedError,
            id,
            Payload::Error(error),
        );
        self.remove_message(id);
    }

    // -- lifecycle --------------------------------------------------------------

    /// Destroy every channel (and with them every message and model).
    pub fn cleanup(&mut self) {
        for id in self.channels.ids() {
            self.remove_channel(&id);
        }
        for id in self.messages.ids() {
            self.remove_message(&id);
        }
        info!("client cleaned up");
    }

    /// Forget everything without raising notifications.
    pub fn reset(&mut self) {
        self.card_models.clear();
        self.messages.clear();
        self.channels.clear();
        self.hub = EventHub::new();
        self.in_flight.clear();
        info!("client reset");
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("app_id", &self.config.app_id)
            .field("channels", &self.channels.len())
            .field("messages", &self.messages.len())
            .field("card_models", &self.card_models.len())
            .field("pending", &self.hub.queue.len())
            .finish()
    }
}

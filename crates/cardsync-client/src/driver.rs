//! Async transport driver.
//!
//! The transport runs elsewhere and feeds already-decoded mutations into a
//! tokio mpsc channel.  [`run`] drains it in batches: the event it woke up
//! for plus everything already buffered.  Each batch ends with one
//! [`Client::flush`], so a batch is one turn of the event loop and `change`
//! notifications raised anywhere inside it coalesce.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use cardsync_shared::{EntityId, SendResult};
use cardsync_store::{Channel, ChannelData, ChannelUpdate, Message, MessageData, MessagePart};

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Transport events
// ---------------------------------------------------------------------------

/// Mutations delivered by the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    ChannelReceived(Channel),
    ChannelLoaded {
        id: EntityId,
        data: ChannelData,
    },
    ChannelLoadFailed {
        id: EntityId,
        error: String,
    },
    /// Create-or-find answered; `confirmed` may differ from `tentative`.
    ChannelSent {
        tentative: EntityId,
        confirmed: EntityId,
        result: SendResult,
    },
    ChannelSendFailed {
        id: EntityId,
        error: String,
    },
    ChannelDeleted(EntityId),
    ChannelUpdated {
        id: EntityId,
        update: ChannelUpdate,
    },
    MessageReceived(Message),
    MessageLoaded {
        id: EntityId,
        data: MessageData,
    },
    MessageLoadFailed {
        id: EntityId,
        error: String,
    },
    MessageSent {
        tentative: EntityId,
        confirmed: Option<EntityId>,
    },
    MessageDeleted(EntityId),
    PartAdded {
        message_id: EntityId,
        part: MessagePart,
    },
    PartRemoved {
        message_id: EntityId,
        part_id: EntityId,
    },
    /// A part body changed or a requested fetch completed.
    PartContent {
        message_id: EntityId,
        part_id: EntityId,
        body: Option<String>,
    },
    PartFetchFailed {
        message_id: EntityId,
        part_id: EntityId,
        error: String,
    },
}

/// Create the transport channel sized from `config`.
pub fn channel(config: &ClientConfig) -> (mpsc::Sender<TransportEvent>, mpsc::Receiver<TransportEvent>) {
    mpsc::channel(config.event_buffer)
}

impl Client {
    /// Apply one transport event.  Notifications stay queued until the
    /// next flush.
    pub fn apply(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::ChannelReceived(channel) => {
                self.add_channel(channel);
            }
            TransportEvent::ChannelLoaded { id, data } => {
                self.complete_channel_load(&id, data);
            }
            TransportEvent::ChannelLoadFailed { id, error } => {
                self.channel_load_failed(&id, error);
            }
            TransportEvent::ChannelSent {
                tentative,
                confirmed,
                result,
            } => self.channel_sent(&tentative, confirmed, result)?,
            TransportEvent::ChannelSendFailed { id, error } => {
                self.channel_send_failed(&id, error);
            }
            TransportEvent::ChannelDeleted(id) => {
                self.channel_deleted(&id);
            }
            TransportEvent::ChannelUpdated { id, update } => {
                self.update_channel(&id, update)?;
            }
            TransportEvent::MessageReceived(message) => {
                let id = message.id.clone();
                self.add_message(message);
                self.refresh_models(&id);
            }
            TransportEvent::MessageLoaded { id, data } => {
                self.complete_message_load(&id, data);
            }
            TransportEvent::MessageLoadFailed { id, error } => {
                self.message_load_failed(&id, error);
            }
            TransportEvent::MessageSent {
                tentative,
                confirmed,
            } => self.message_sent(&tentative, confirmed)?,
            TransportEvent::MessageDeleted(id) => {
                self.remove_message(&id);
            }
            TransportEvent::PartAdded { message_id, part } => {
                self.part_added(&message_id, part)?;
            }
            TransportEvent::PartRemoved {
                message_id,
                part_id,
            } => {
                self.part_removed(&message_id, &part_id)?;
            }
            TransportEvent::PartContent {
                message_id,
                part_id,
                body,
            } => self.part_content_changed(&message_id, &part_id, body)?,
            TransportEvent::PartFetchFailed {
                message_id,
                part_id,
                error,
            } => self.part_fetch_failed(&message_id, &part_id, error),
        }
        Ok(())
    }
}

/// Drive `client` from `rx` until every sender is dropped.
///
/// Returns the number of batches processed.  A failing event is logged and
/// skipped; the rest of its batch still applies.
pub async fn run(client: &mut Client, mut rx: mpsc::Receiver<TransportEvent>) -> usize {
    let mut batches = 0usize;

    while let Some(first) = rx.recv().await {
        let mut applied = 0usize;
        let mut next = Some(first);
        while let Some(event) = next.take() {
            if let Err(e) = client.apply(event) {
                warn!(error = %e, "Failed to apply transport event");
            }
            applied += 1;
            next = rx.try_recv().ok();
        }

        let delivered = client.flush();
        batches += 1;
        debug!(applied, delivered = delivered.len(), "batch flushed");
    }

    info!(batches, "Transport channel closed");
    batches
}

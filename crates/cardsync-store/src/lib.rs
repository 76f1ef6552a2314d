//! # cardsync-store
//!
//! In-memory entity stores for the cardsync client.
//!
//! The crate exposes a generic [`Registry`] that guarantees one live instance
//! per entity id, its channel and message instantiations, and the card-model
//! layer: typed views over a message's part tree with payload parsing and
//! metadata merging.

pub mod card_model;
pub mod card_models;
pub mod channels;
pub mod messages;
pub mod models;
pub mod part_tree;
pub mod registry;

mod error;

pub use card_model::{Action, CardModel, ModelKind, ModelState, PartAdded};
pub use card_models::{CardModelStore, Registration};
pub use channels::ChannelStore;
pub use error::{Result, StoreError};
pub use messages::MessageStore;
pub use models::*;
pub use part_tree::PartTree;
pub use registry::{shared, Dependent, EventHub, Registrable, Registry, Rekey, Shared};

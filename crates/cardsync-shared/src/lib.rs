//! # cardsync-shared
//!
//! Identifiers, error taxonomy, notification plumbing and listener
//! bookkeeping shared by the store and client crates.

pub mod case;
pub mod constants;
pub mod error;
pub mod events;
pub mod subscriptions;
pub mod types;

pub use error::{CoreError, Result};
pub use events::{EventName, EventQueue, Notification, Payload, Scope};
pub use subscriptions::Subscriptions;
pub use types::{EntityId, EntityKind, SendResult};

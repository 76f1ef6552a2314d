//! # cardsync-client
//!
//! The client context tying the cardsync stores together.
//!
//! A [`Client`] owns the channel, message and card-model registries, the
//! notification hub and the external collaborators.  Transport mutations
//! are applied through its methods (or [`driver::run`]), and queued
//! notifications reach listeners when the client flushes.

pub mod card_sync;
pub mod client;
pub mod collaborators;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod logging;

pub use client::Client;
pub use collaborators::{CacheEvictor, Loader, NoopEvictor, NoopLoader};
pub use config::ClientConfig;
pub use driver::{run, TransportEvent};
pub use error::{ClientError, Result};
pub use events::{ListenerId, Listeners};
pub use logging::init_tracing;

use cardsync_shared::{CoreError, EntityId};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Identifier, parse or support failure from the shared layer.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The referenced entity is not registered.
    #[error("Entity not found: {0}")]
    NotFound(EntityId),

    /// The referenced part does not belong to the message.
    #[error("Part {part} not found in message {message}")]
    PartNotFound { message: EntityId, part: EntityId },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

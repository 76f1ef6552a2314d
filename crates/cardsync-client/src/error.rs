use cardsync_shared::{CoreError, EntityId};
use cardsync_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// `generate_message` was called on a model that already has a message.
    #[error("Card model {0} is already bound to a message")]
    AlreadyBound(EntityId),
}

impl ClientError {
    pub fn not_found(id: &EntityId) -> Self {
        Self::Store(StoreError::NotFound(id.clone()))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

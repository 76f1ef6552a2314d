use thiserror::Error;

/// Error taxonomy shared by the registry and card-model layers.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A lookup was handed something that is not a well-formed identifier.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A part body could not be decoded into a JSON payload.
    #[error("Parse failure: {0}")]
    ParseFailure(#[from] serde_json::Error),

    /// A part body decoded, but not into a JSON object.
    #[error("Payload is not a JSON object")]
    PayloadNotObject,

    /// A model kind was asked to bind to a message/part it does not recognize.
    #[error("Unsupported message: {0}")]
    UnsupportedMessage(String),

    /// The server rejected a create-or-find request.
    #[error("Rejected by server: {0}")]
    Rejected(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;

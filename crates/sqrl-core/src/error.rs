use thiserror::Error;

/// Opaque-to-transport error kinds surfaced on action status (spec §7).
#[derive(Error, Debug)]
pub enum SqrlError {
    #[error("action canceled")]
    Canceled,

    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("invalid uri: {0}")]
    Uri(String),

    #[error("protocol failure: {0}")]
    Protocol(String),

    #[error("invalid state transition: {0}")]
    State(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SqrlError>;

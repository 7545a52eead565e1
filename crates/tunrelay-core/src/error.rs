use thiserror::Error;

/// Errors produced by the tunnel relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no candidates for group {0}")]
    NoCandidates(String),

    #[error("no route available")]
    NoRouteAvailable,

    #[error("failed")]
    Unavailable,

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<ciborium::de::Error<std::io::Error>> for RelayError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        RelayError::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for RelayError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        RelayError::Codec(e.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

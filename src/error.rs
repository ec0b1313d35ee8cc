use thiserror::Error;

/// Failures the bridge distinguishes between.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The handshake request failed or returned no session URL.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The socket to the session URL could not be opened.
    #[error("failed to open socket: {0}")]
    Connect(String),

    /// A command carried a token that does not parse as a URL.
    #[error("invalid URL '{token}': {source}")]
    InvalidUrl {
        token: String,
        #[source]
        source: url::ParseError,
    },

    /// The URL parsed but does not point at a topic or a category.
    #[error("no forum entity matches path {0}")]
    ResolutionMiss(String),

    #[error(transparent)]
    Unhandled(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Handshake,
    Connect,
    InvalidUrl,
    ResolutionMiss,
    Unhandled,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Handshake(_) => ErrorKind::Handshake,
            BridgeError::Connect(_) => ErrorKind::Connect,
            BridgeError::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            BridgeError::ResolutionMiss(_) => ErrorKind::ResolutionMiss,
            BridgeError::Unhandled(_) => ErrorKind::Unhandled,
        }
    }
}

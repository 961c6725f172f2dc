use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The peer sent a line longer than the reader's bound.
    #[error("line too long")]
    LineTooLong,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("jrpc: unexpected request")]
    UnexpectedRequest,

    #[error("jrpc: invalid client tag")]
    InvalidClientTag,

    #[error("jrpc: invalid server tag")]
    InvalidServerTag,

    #[error("jrpc: nil result")]
    NilResult,

    /// An error reported by the peer.
    #[error("remote: {0}")]
    Remote(String),

    #[error("unexpected response id {got} (expected {expected})")]
    UnexpectedResponse { expected: u64, got: u64 },

    #[error("invalid key length")]
    InvalidKey,

    #[error("timed out")]
    Timeout,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Entropy(#[from] rand::Error),
}

impl Error {
    /// Recovers a typed handshake error from the message a peer reported.
    pub(crate) fn from_remote(message: String) -> Self {
        [
            Error::UnexpectedRequest,
            Error::InvalidClientTag,
            Error::InvalidServerTag,
        ]
        .into_iter()
        .find(|e| e.to_string() == message)
        .unwrap_or(Error::Remote(message))
    }

    /// Whether either side of the handshake rejected the other's tag.
    pub fn is_tag_mismatch(&self) -> bool {
        matches!(self, Error::InvalidClientTag | Error::InvalidServerTag)
    }
}

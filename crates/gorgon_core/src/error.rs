use crate::ClientId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bringing up the system under test, a client, or a generator failed.
    #[error("set-up failed: {0}")]
    SetUp(String),

    #[error("tear-down failed: {0}")]
    TearDown(String),

    /// A generator could not produce or observe an instruction.
    #[error("generator {name} failed: {message}")]
    Generator { name: String, message: String },

    #[error("client {client} failed: {message}")]
    Client { client: ClientId, message: String },

    #[error("unsupported instruction: {0}")]
    UnsupportedInstruction(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// A call to a remote agent failed.
    #[error("remote call {method} failed: {message}")]
    Remote { method: String, message: String },

    #[error("worker panicked: {0}")]
    WorkerPanic(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn generator(name: impl Into<String>, message: impl ToString) -> Self {
        Error::Generator {
            name: name.into(),
            message: message.to_string(),
        }
    }

    pub fn remote(method: impl Into<String>, message: impl ToString) -> Self {
        Error::Remote {
            method: method.into(),
            message: message.to_string(),
        }
    }
}

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced by the transfer, listener and discovery layers.
///
/// `Cancelled` is a deliberate stop and is never reported as a failure.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Cannot connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl TransferError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;

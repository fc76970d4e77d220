use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use carpet_crypto::CryptoError;
use thiserror::Error;

use crate::link::LinkError;

const REMEDIATION: &str = "Please quit and restart the transfer.";

/// Everything that can end a session early.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The user asked to stop. Not a fault.
    #[error("transfer was canceled during {during}")]
    Cancelled { during: &'static str },

    #[error("could not dial peer at {addr} after {attempts} attempts")]
    DialExhausted { addr: SocketAddr, attempts: u32 },

    #[error("could not listen on :{port}: {source}")]
    Listen {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("error reading file: expected {expected} bytes, read {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("peer IP address is unknown, the link was not established")]
    MissingPeerAddress,

    #[error("no files to send")]
    NoFiles,

    #[error("invalid path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },
}

impl TransferError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        TransferError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            TransferError::Cancelled { .. } | TransferError::Link(LinkError::Cancelled)
        )
    }

    /// Text for the UI: the cause, plus what to do about it unless the user
    /// canceled on purpose.
    pub fn user_message(&self) -> String {
        if self.is_cancelled() {
            format!("Exiting, {}.", self)
        } else {
            format!("{}\n{}", self, REMEDIATION)
        }
    }
}

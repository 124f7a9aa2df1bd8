//! Error types for the log follower library.

use thiserror::Error;
use tokio::sync::mpsc;

/// The main error type for log follower operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors when opening, reading or stating the followed file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File watching errors from the notify crate.
    #[error("File watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// File path errors.
    #[error("Invalid file path: {message}")]
    InvalidPath { message: String },

    /// The file to follow does not exist.
    #[error("File does not exist: {path}")]
    FileNotFound { path: String },

    /// Options that cannot drive a follower (zero capacity, zero interval, unknown strategy).
    #[error("Invalid options: {message}")]
    InvalidOptions { message: String },

    /// The watcher delivered an event kind we have no handling for.
    #[error("Unrecognized file event: {kind}")]
    UnrecognizedEvent { kind: String },

    /// A blocking file operation panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A thread panicked while holding the file state lock.
    #[error("File state lock poisoned")]
    Poisoned,
}

/// A convenient Result type for log follower operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Io(inner) => inner,
            Error::FileNotFound { .. } => std::io::Error::new(std::io::ErrorKind::NotFound, error),
            other => std::io::Error::other(other),
        }
    }
}

/// Sending half of the single-slot error mailbox.
///
/// Background loops report fatal errors here. At most one error is pending at
/// a time; reports made while the slot is occupied are dropped so a loop never
/// waits on a slow reader.
#[derive(Clone, Debug)]
pub(crate) struct ErrorSlot {
    tx: mpsc::Sender<Error>,
}

impl ErrorSlot {
    /// Creates the mailbox, returning the shared sender and the reader's receiver.
    pub(crate) fn channel() -> (Self, mpsc::Receiver<Error>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    pub(crate) fn report(&self, error: Error) {
        if let Err(mpsc::error::TrySendError::Full(dropped)) = self.tx.try_send(error) {
            tracing::debug!(error = %dropped, "error already pending, dropping");
        }
    }
}

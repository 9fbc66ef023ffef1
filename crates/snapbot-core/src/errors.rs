use std::path::PathBuf;

use crate::domain::ChatId;

/// Core error type for the bot.
///
/// Store and validation variants are turned into chat replies at the command
/// boundary; adapter crates map their transport failures into `External`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("chat {0} is already registered")]
    AlreadyRegistered(ChatId),

    #[error("chat {0} is not registered")]
    NotRegistered(ChatId),

    #[error("address not found: {0}")]
    NotFound(String),

    #[error("address already watched: {0}")]
    AlreadyWatching(String),

    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("invalid time: {0:?} (expected HH:MM)")]
    InvalidTime(String),

    #[error("persistence error: {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    #[error("external error: {0}")]
    External(String),
}

/// Failure to retrieve proposals for one space.
///
/// Kept apart from `Error`: it never aborts an operation, it becomes the body of
/// that space's notification. The cause ends up verbatim in the chat message.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{cause}")]
pub struct FetchError {
    pub cause: String,
}

impl FetchError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Nostr SDK error.
    #[error("Nostr SDK error: {0}")]
    NostrSdk(#[from] nostr_sdk::client::Error),

    /// Announcement or identity parsing error.
    #[error(transparent)]
    Core(#[from] tidepool_core::Error),

    /// Relay connection error.
    #[error("Relay error ({url}): {reason}")]
    Relay { url: String, reason: String },

    /// The item is already registered.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The item does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A fan-out operation found no connected relay to work with.
    #[error("No connected relays")]
    NoConnectedRelays,

    /// A bounded operation ran out of time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The trusted-publisher set could not be resolved.
    #[error("Trust resolution error: {0}")]
    Trust(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Shorthand for a relay error.
    pub fn relay(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Relay {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

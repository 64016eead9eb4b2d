//! Error types for Tidepool core parsing.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while interpreting announcements.
#[derive(Error, Debug)]
pub enum Error {
    /// A declared tag carried a value of the wrong shape.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// The magnet locator could not be interpreted.
    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    /// A publisher identity was neither hex nor npub.
    #[error("invalid pubkey '{0}'")]
    InvalidPubkey(String),
}

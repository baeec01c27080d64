//! Error types for data parsing in wolweb-types.

use thiserror::Error;

/// Errors that can occur when building wolweb values from untrusted input.
///
/// This error type is transport-agnostic and does not include HTTP
/// failures (those belong in wolweb-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A device address was empty or only whitespace.
    #[error("device address cannot be empty")]
    EmptyAddress,

    /// A device address contained a control character.
    #[error("device address contains a control character at byte {position}")]
    ControlCharacter {
        /// Byte offset of the offending character.
        position: usize,
    },
}

/// Result type alias using wolweb-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

use std::fmt::Display;
use std::io;

pub use self::BencodeError as Error;

/// Errors produced while encoding or decoding bencode.
#[derive(Debug, thiserror::Error)]
pub enum BencodeError {
    /// The sink or source failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Encode was asked for a type bencode cannot represent (bool, float, unit, null...).
    #[error("Unhandled type")]
    InvalidType,

    /// A dictionary key did not serialize to a byte string.
    #[error("Invalid map key")]
    InvalidMapKey,

    /// A byte that cannot begin or continue a value at this position.
    #[error("Invalid data in buffer")]
    InvalidData,

    /// Input ended before a list terminator.
    #[error("Invalid list received")]
    InvalidList,

    /// A declared string length exceeds the bytes available.
    #[error("String is not long enough")]
    TruncatedString,

    /// Containers nested deeper than the decoder allows.
    #[error("Nesting exceeds maximum depth of {0}")]
    NestingTooDeep(usize),

    /// Bytes left over after a single complete value.
    #[error("Trailing data after value")]
    TrailingData,

    #[error("Serde error: {0}")]
    Serde(String),
}

impl serde::ser::Error for BencodeError {
    fn custom<T: Display>(msg: T) -> Self {
        BencodeError::Serde(msg.to_string())
    }
}

impl serde::de::Error for BencodeError {
    fn custom<T: Display>(msg: T) -> Self {
        BencodeError::Serde(msg.to_string())
    }
}

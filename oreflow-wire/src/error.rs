use std::io;

use thiserror::Error;

/// An error produced while decoding the tagged text format.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("invalid tag: 0x{0:02x}")]
    InvalidTag(u8),

    #[error("unknown escape: 0x{0:02x}")]
    UnknownEscape(u8),

    #[error("invalid number: {0:?}")]
    InvalidNumber(String),

    #[error("string body is not valid UTF-8")]
    InvalidUtf8,

    /// Only numbers, strings, and booleans may key a table.
    #[error("invalid table key: {0}")]
    InvalidTableKey(&'static str),

    #[error("array key is not a number: {0}")]
    NonNumberArrayKey(&'static str),

    #[error("array key is not an integer: {0}")]
    NonIntegerArrayKey(f64),
}

/// Error type of [`WireCodec`](crate::WireCodec): a decode failure or the
/// underlying socket error.
#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

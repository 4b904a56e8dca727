//! # Wire-level error definitions

/// Failures while interpreting a raw message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The message carried the protocol marker but an `action` no peer understands.
    UnknownAction(String),
    /// The message carried the protocol marker but its structure did not decode.
    Malformed(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownAction(action) => write!(f, "unknown action: {}", action),
            Self::Malformed(msg) => write!(f, "malformed message: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

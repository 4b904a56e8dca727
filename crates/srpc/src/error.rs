//! # Error definitions
//!
//! The central ledger of runtime failures. Inbound dispatch converts every
//! one of these into a `success = false` reply when the call type expects a
//! reply; outbound calls surface them to the caller directly.

/// Failures within the RPC runtime.
#[derive(Debug, Clone)]
pub enum RpcError {
    /// No registry entry for an id or target referenced by a message.
    NotRegistered(String),
    /// The resolved host target has no such property or method.
    MemberNotFound { member: String },
    /// A proxy class descriptor does not cover a required interface member.
    SpecMismatch { class_id: String, member: String },
    /// Argument count mismatch, null where a value type was expected, or an
    /// incompatible conversion.
    Marshal(String),
    /// The peer reported `success = false`; carries the peer's message.
    RemoteCall(String),
    /// A required send capability is not present on the bound channel.
    ChannelUnavailable(&'static str),
    /// Malformed or unknown message.
    Protocol(String),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRegistered(id) => write!(f, "not registered: {}", id),
            Self::MemberNotFound { member } => write!(f, "member not found: {}", member),
            Self::SpecMismatch { class_id, member } => {
                write!(f, "descriptor for {} does not cover member {}", class_id, member)
            }
            Self::Marshal(msg) => write!(f, "marshal error: {}", msg),
            Self::RemoteCall(msg) => write!(f, "remote call failed: {}", msg),
            Self::ChannelUnavailable(capability) => {
                write!(f, "channel capability unavailable: {}", capability)
            }
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<srpc_wire::Error> for RpcError {
    fn from(e: srpc_wire::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

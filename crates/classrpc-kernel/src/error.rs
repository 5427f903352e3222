//! Kernel-specific error types.

use classrpc_types::error::{BridgeError, ErrorKind, ThrownError};
use classrpc_wire::WireError;
use thiserror::Error;

/// Error type for every bridge operation seen from the consumer side.
#[derive(Error, Debug)]
pub enum RpcError {
    /// A failure reported by the origin side (or raised locally in its taxonomy).
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The transport failed.
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The member is not on the imported class surface.
    #[error("Unknown member '{member}' on class {class_name}")]
    UnknownMember { class_name: String, member: String },

    /// A sync member was called asynchronously or the other way round.
    #[error("Member '{member}' must be called {expected}")]
    WrongCallStyle {
        member: String,
        expected: &'static str,
    },
}

impl RpcError {
    /// The bridge error kind, when the failure came through the bridge.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RpcError::Bridge(e) => Some(e.kind()),
            _ => None,
        }
    }

    /// The reconstructed error thrown by exported code, if that is what failed.
    pub fn thrown(&self) -> Option<&ThrownError> {
        match self {
            RpcError::Bridge(BridgeError::User(thrown)) => Some(thrown),
            _ => None,
        }
    }
}

/// Alias for kernel results.
pub type RpcResult<T> = Result<T, RpcError>;

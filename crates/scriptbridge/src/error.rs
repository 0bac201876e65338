//! Error taxonomy for bridge calls.

use crate::bridge::transport::TransportError;

/// Errors surfaced to callers of the invocation facade.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Discriminator present but names no declared candidate.
    #[error("unresolvable union: tag '{tag}' is not one of [{}]", .candidates.join(", "))]
    UnresolvableUnion { tag: String, candidates: Vec<String> },

    /// Payload could not be decoded into the expected shape.
    #[error("malformed payload for {expected}: {reason}")]
    MalformedPayload { expected: String, reason: String },

    #[error("handle not found: {id}")]
    HandleNotFound { id: String },

    /// The registry holds a proxy for this id, but of another type.
    #[error("handle {id} is not a {expected}")]
    HandleKindMismatch { id: String, expected: &'static str },

    /// The remote runtime faulted while executing the call.
    #[error("remote fault in '{name}': {message}")]
    Remote { name: String, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to serialize argument: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl BridgeError {
    pub fn malformed(expected: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedPayload {
            expected: expected.into(),
            reason: reason.to_string(),
        }
    }

    pub fn handle_not_found(id: impl Into<String>) -> Self {
        Self::HandleNotFound { id: id.into() }
    }

    /// True for the "gone" state that lookup paths are allowed to degrade.
    pub fn is_handle_not_found(&self) -> bool {
        matches!(self, Self::HandleNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors a callback dispatch reports back across the boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// The registration was disposed (or never existed). Indicates a lifetime bug
    /// on the calling side.
    #[error("callback {id} has been disposed")]
    Disposed { id: String },

    #[error("callback {id} has no method '{method}'")]
    UnknownMethod { id: String, method: String },

    #[error("callback {id} takes no payload")]
    Arity { id: String },

    #[error("callback {id} payload rejected: {reason}")]
    Payload { id: String, reason: String },

    #[error("callback {id} failed: {reason}")]
    Failed { id: String, reason: String },
}

//! Wire protocol types for host-remote communication.
//!
//! Two directions on one framed stream:
//! - **Host → remote**: calls and callback completions
//! - **Remote → host**: replies, faults and callback invocations
//!
//! Callback tokens (`{"callbackId": ..., "method": ...}`) embedded in call arguments
//! live here too; handle tokens are `crate::handles::RemoteHandle`.

use serde::{Deserialize, Serialize};

/// Correlates a host call with its reply. Monotonic per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(u64);

impl CallId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a callback registration.
///
/// UUID v4 so a stale token held by the remote side can never alias a newer
/// registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(uuid::Uuid);

impl CallbackId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for CallbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote-assigned id for one callback invocation, echoed back on completion.
pub type InvocationId = u64;

/// Token the remote side uses to call back into a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackToken {
    pub callback_id: CallbackId,
    pub method: String,
}

/// Messages from host to remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Call expecting a result value.
    Call {
        id: CallId,
        name: String,
        args: Vec<serde_json::Value>,
    },

    /// Call expecting only an acknowledgment.
    CallVoid {
        id: CallId,
        name: String,
        args: Vec<serde_json::Value>,
    },

    /// Callback ran to completion. `result` carries a function's return value.
    CallbackDone {
        invocation: InvocationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },

    /// Callback dispatch failed locally (disposed, bad payload, ...).
    CallbackFault {
        invocation: InvocationId,
        error: String,
    },
}

/// Messages from remote to host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteMessage {
    Reply {
        id: CallId,
        result: serde_json::Value,
    },

    /// Acknowledges a `call_void`.
    Ack {
        id: CallId,
    },

    /// The call faulted on the remote side. `error` is host-specific diagnostic text.
    Fault {
        id: CallId,
        error: String,
    },

    InvokeCallback {
        invocation: InvocationId,
        callback: CallbackId,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
}

impl RemoteMessage {
    /// Call id this message answers, if it is a reply of any kind.
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            Self::Reply { id, .. } | Self::Ack { id } | Self::Fault { id, .. } => Some(*id),
            Self::InvokeCallback { .. } => None,
        }
    }
}

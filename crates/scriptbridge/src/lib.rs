//! scriptbridge: typed invocation bridge to a remote scripting runtime.
//!
//! The host calls named functions in a remote runtime with marshaled arguments and
//! gets typed results back. The remote side can call host callbacks by token, and
//! remote objects are represented locally by registered proxies.

pub mod bridge;
pub mod callback;
pub mod config;
pub mod error;
pub mod handles;
pub mod invoke;
pub mod logging;
pub mod marshal;
pub mod resolve;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::transport::{FramedTransport, Transport, TransportError};
pub use callback::{
    Callback, CallbackRegistration, CallbackTable, Disposables, ListenerSubscription,
};
pub use config::BridgeConfig;
pub use error::{BridgeError, CallbackError, Result};
pub use handles::{HandleRegistry, RemoteBacked, RemoteHandle};
pub use invoke::{Bridge, CallPhase};
pub use marshal::{Arg, ElementRef, WireEnum};
pub use resolve::{Candidate, CandidateTag, OneOf2, OneOf3, Tagged, UnionContract};

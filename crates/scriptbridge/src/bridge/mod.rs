//! Wire layer between the host and the remote runtime.
//!
//! # Architecture
//!
//! - **protocol**: Message types (HostMessage/RemoteMessage, callback tokens)
//! - **codec**: JSON framing codec for AsyncRead/AsyncWrite
//! - **transport**: `Transport` trait and the framed implementation

pub mod codec;
pub mod protocol;
pub mod transport;

//! JSON-RPC transport layer
//!
//! One inbound connection at a time, framed and demultiplexed:
//!
//! - [`codec`] — `Content-Length` header framing for byte streams
//! - [`message`] — the wire message model and error codes
//! - [`channel`] — the duplex framed-message adapter (stdio or WebSocket)
//! - [`session`] — request/response correlation and method dispatch

pub mod channel;
pub mod codec;
pub mod message;
pub mod session;

pub use channel::{MessageChannel, PrefixedStream, UpgradedSocket};
pub use codec::HeaderCodec;
pub use message::{Incoming, Message, ResponseError};
pub use session::{LogLevel, RpcSession, SessionClient};

//! Network connections between bus applications.
//!
//! A connection is a bus process that speaks a framed wire protocol with one
//! peer. Frames are `u32` length + type byte + payload; the payload encoding
//! is chosen by a [`NetworkProtocol`] identified by its URI scheme.

pub mod codec;
pub mod connection;
pub mod frame;
pub mod protocol;
pub mod queue;
pub mod server;

pub use connection::{NetworkConnection, Transport};
pub use frame::{Frame, Hello, WireError, WireEvent, WireRequest};
pub use protocol::{
    decode_value, encode_value, JsonProtocol, MsgpackProtocol, NetworkProtocol, ProtocolRegistry,
    JSON_SCHEME, MSGPACK_SCHEME,
};
pub use queue::FrameQueue;
pub use server::NetworkServer;

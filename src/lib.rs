//! A bidirectional async RPC runtime layered over a single WebSocket
//! connection: either side of the socket may issue a CALL or ONEWAY and
//! expect the other to answer, the way a WebSocket-carried Thrift service
//! can call back into a connected client.
//!
//! The pieces, roughly bottom-up:
//! - [`header`] — the wire header (method name, message type, sequence id)
//!   and the pluggable [`header::RpcEncode`]/[`header::RpcDecode`] body
//!   contract.
//! - [`transport`] — [`transport::FrameTransport`], the buffered bridge
//!   between whole WebSocket messages and framed RPC messages.
//! - [`queue`] — [`queue::MessageQueue`], classifying received frames by
//!   message type.
//! - [`protocol`] — [`protocol::DispatchingProtocol`] and its
//!   `wait_for_message`, letting independent waiters share one connection.
//! - [`ws`] — the WebSocket protocol adapter: [`ws::connect`], [`ws::accept`],
//!   [`ws::serve`], and [`ws::WsConnection`].
//! - [`runner`] — [`runner::ConnectionRunner`] and the [`runner::Processor`]
//!   trait, driving the server-loop side of a connection.
//! - [`registry`] — [`registry::ClientRegistry`], tracking connected peers.
//! - [`stub`] — [`stub::Stub`], the generated-style client/server call site.
//! - [`codec_registry`] — [`codec_registry::MethodDispatcher`], an optional
//!   method-name-keyed [`runner::Processor`] so a server needn't hand-write
//!   one big match arm per method.

pub mod codec_registry;
pub mod error;
pub mod header;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod stub;
pub mod transport;
pub mod ws;

pub use codec_registry::MethodDispatcher;
pub use error::{RemoteException, RpcError, RpcResult};
pub use header::{MessageHeader, MessageType, QueuedMessage, RpcDecode, RpcEncode};
pub use protocol::DispatchingProtocol;
pub use queue::MessageQueue;
pub use registry::{ClientRegistry, PeerId};
pub use runner::{CancellationToken, ConnectionRunner, Processor};
pub use stub::Stub;
pub use transport::FrameTransport;
pub use ws::{accept, connect, serve, WsConnection, WsStream};

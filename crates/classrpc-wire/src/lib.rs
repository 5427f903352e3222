//! classrpc wire transport.
//!
//! Carries topic-addressed JSON payloads between the consumer and origin sides
//! of the bridge over any byte stream (TCP, Unix sockets, in-memory pipes).
//!
//! ## Architecture
//!
//! - **WireMessage**: length-prefixed JSON frames (request / response / notification)
//! - **Transport**: consumer-side primitives (fire-and-forget send, blocking
//!   request/reply, subscribe-once)
//! - **StreamTransport**: `Transport` over a stream, driven by its own I/O thread
//! - **MessageHandler** + [`serve`]: origin-side dispatch loop

pub mod connection;
pub mod message;
pub mod server;
pub mod transport;

pub use connection::{ConnectionConfig, StreamTransport, MAX_MESSAGE_SIZE};
pub use message::{decode_frame, encode_frame, WireMessage, WireMessageKind};
pub use server::{listen_tcp, serve, spawn_server};
pub use transport::{MessageHandler, Outbox, Subscription, Transport, WireError};

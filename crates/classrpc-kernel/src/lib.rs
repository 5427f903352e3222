//! Class bridge kernel.
//!
//! The origin side exports classes through an [`Exporter`] and serves it with
//! an [`OriginRouter`]. The consumer side imports them through an [`Importer`],
//! which hands out proxies whose calls travel as call envelopes and come back
//! as result envelopes, errors rebuilt by the [`ErrorCodec`].

pub mod class;
pub mod codec;
pub mod config;
pub mod connect;
pub mod error;
pub mod exporter;
pub mod importer;
pub mod registry;
pub mod router;

pub use class::{Args, ClassBuilder, ClassDef, Outcome};
pub use codec::ErrorCodec;
pub use connect::{connect_local, connect_tcp, serve_tcp};
pub use error::{RpcError, RpcResult};
pub use exporter::Exporter;
pub use importer::{Importer, Invocation, ProxyClass, RemoteObject};
pub use router::{CallRouter, OriginRouter, PendingCall};

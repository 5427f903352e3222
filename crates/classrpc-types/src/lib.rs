//! Core types for the classrpc class bridge.
//!
//! This crate defines the data structures shared by the origin (exporter) and
//! consumer (importer) halves of the bridge: envelopes, class surfaces, the
//! error taxonomy and configuration. It contains no business logic.

pub mod config;
pub mod envelope;
pub mod error;
pub mod surface;

pub use config::BridgeConfig;
pub use envelope::{CallEnvelope, CallId, CallKind, CallReply, ObjectId, ResultEnvelope};
pub use error::{BridgeError, BridgeResult, ErrorKind, SerializedError, ThrownError};
pub use surface::{ClassSurface, MemberDecl, MemberKind, NamingRules};

//! Shared error types for the class bridge.
//!
//! Two layers live here:
//! - [`ThrownError`] is the portable shape of anything thrown by exported code:
//!   a type name plus an open bag of fields (the message is one of them).
//! - [`BridgeError`] is the bridge's own taxonomy. Every variant maps onto a
//!   `ThrownError` with a well-known type name so it survives the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Field that carries the human-readable message.
pub const MESSAGE_FIELD: &str = "message";

/// Field that carries the subject of a bridge error (class name, object id, ...).
pub const DETAIL_FIELD: &str = "detail";

/// Type name of the generic fallback error.
pub const GENERIC_ERROR: &str = "Error";

/// Kinds of failure a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A class name was exported twice.
    Conflict,
    /// A class name is not (or no longer) exported.
    NotExported,
    /// A lifecycle or accessor envelope was malformed.
    BadRequest,
    /// The object id names no live instance.
    DestroyedObject,
    /// Anything thrown by the exported class itself.
    User,
}

impl ErrorKind {
    /// Wire type name for this kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::NotExported => "NotExportedError",
            ErrorKind::BadRequest => "BadRequestError",
            ErrorKind::DestroyedObject => "DestroyedObjectError",
            ErrorKind::User => GENERIC_ERROR,
        }
    }

    /// Classify a wire type name. Unknown names are user errors.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "ConflictError" => ErrorKind::Conflict,
            "NotExportedError" => ErrorKind::NotExported,
            "BadRequestError" => ErrorKind::BadRequest,
            "DestroyedObjectError" => ErrorKind::DestroyedObject,
            _ => ErrorKind::User,
        }
    }
}

/// An error thrown by exported code, or reconstructed from the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrownError {
    type_name: String,
    fields: Map<String, Value>,
}

impl ThrownError {
    /// Create an error of the given type with a message.
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(MESSAGE_FIELD.to_string(), Value::String(message.into()));
        Self {
            type_name: type_name.into(),
            fields,
        }
    }

    /// Create a generic `Error` with a message.
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(GENERIC_ERROR, message)
    }

    /// Create an error of the given type with an empty message.
    pub fn blank(type_name: impl Into<String>) -> Self {
        Self::new(type_name, "")
    }

    /// Capture any `std::error::Error` as a generic error.
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        Self::generic(err.to_string())
    }

    /// Builder-style field assignment.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(key, value);
        self
    }

    /// Assign (or overwrite) a field.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Read a field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All fields, message included.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The error's type name (e.g. `RangeError`).
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The message, or an empty string when none was set.
    pub fn message(&self) -> &str {
        self.fields
            .get(MESSAGE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Classify this error by its type name.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_type_name(&self.type_name)
    }
}

impl fmt::Display for ThrownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.message();
        if message.is_empty() {
            write!(f, "{}", self.type_name)
        } else {
            write!(f, "{}: {}", self.type_name, message)
        }
    }
}

impl std::error::Error for ThrownError {}

/// Wire form of a thrown error: `{"_constructor": <type>, <field>: <value>, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedError {
    /// Runtime type name captured on the throwing side.
    #[serde(rename = "_constructor", default = "generic_error_name")]
    pub constructor: String,
    /// Every field of the thrown error, message included.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn generic_error_name() -> String {
    GENERIC_ERROR.to_string()
}

impl SerializedError {
    /// Capture a thrown error's type name and fields.
    pub fn capture(err: &ThrownError) -> Self {
        Self {
            constructor: err.type_name.clone(),
            fields: err.fields.clone(),
        }
    }
}

/// The bridge's error taxonomy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// A class with this name is already exported.
    #[error("Class already exported: {0}")]
    Conflict(String),

    /// No class with this name is exported.
    #[error("Class not exported: {0}")]
    NotExported(String),

    /// A malformed envelope.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The object id names no live instance.
    #[error("Object {0} has been destroyed.")]
    DestroyedObject(String),

    /// An error thrown by the exported class.
    #[error(transparent)]
    User(ThrownError),
}

impl BridgeError {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Conflict(_) => ErrorKind::Conflict,
            BridgeError::NotExported(_) => ErrorKind::NotExported,
            BridgeError::BadRequest(_) => ErrorKind::BadRequest,
            BridgeError::DestroyedObject(_) => ErrorKind::DestroyedObject,
            BridgeError::User(_) => ErrorKind::User,
        }
    }
}

impl From<BridgeError> for ThrownError {
    fn from(err: BridgeError) -> Self {
        let message = err.to_string();
        let kind = err.kind();
        match err {
            BridgeError::User(thrown) => thrown,
            BridgeError::Conflict(detail)
            | BridgeError::NotExported(detail)
            | BridgeError::BadRequest(detail)
            | BridgeError::DestroyedObject(detail) => {
                ThrownError::new(kind.type_name(), message).with_field(DETAIL_FIELD, detail)
            }
        }
    }
}

impl From<ThrownError> for BridgeError {
    fn from(err: ThrownError) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::User {
            return BridgeError::User(err);
        }
        let detail = err
            .field(DETAIL_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_else(|| err.message())
            .to_string();
        match kind {
            ErrorKind::Conflict => BridgeError::Conflict(detail),
            ErrorKind::NotExported => BridgeError::NotExported(detail),
            ErrorKind::BadRequest => BridgeError::BadRequest(detail),
            ErrorKind::DestroyedObject => BridgeError::DestroyedObject(detail),
            ErrorKind::User => BridgeError::User(err),
        }
    }
}

/// Alias for Result with BridgeError.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_thrown_error_fields() {
        let err = ThrownError::new("RangeError", "bad").with_field("code", 7);
        assert_eq!(err.type_name(), "RangeError");
        assert_eq!(err.message(), "bad");
        assert_eq!(err.field("code"), Some(&json!(7)));
        assert_eq!(err.kind(), ErrorKind::User);
        assert_eq!(err.to_string(), "RangeError: bad");
    }

    #[test]
    fn test_blank_error_display() {
        let err = ThrownError::blank("TypeError");
        assert_eq!(err.message(), "");
        assert_eq!(err.to_string(), "TypeError");
    }

    #[test]
    fn test_serialized_error_wire_shape() {
        let err = ThrownError::new("RangeError", "bad").with_field("code", 7);
        let value = serde_json::to_value(SerializedError::capture(&err)).unwrap();
        assert_eq!(
            value,
            json!({"_constructor": "RangeError", "message": "bad", "code": 7})
        );

        let back: SerializedError = serde_json::from_value(value).unwrap();
        assert_eq!(back.constructor, "RangeError");
        assert!(!back.fields.contains_key("_constructor"));
    }

    #[test]
    fn test_serialized_error_without_constructor() {
        let back: SerializedError = serde_json::from_value(json!({"message": "x"})).unwrap();
        assert_eq!(back.constructor, GENERIC_ERROR);
    }

    #[test]
    fn test_bridge_error_survives_thrown_form() {
        let original = BridgeError::DestroyedObject("abc".to_string());
        let thrown: ThrownError = original.clone().into();
        assert_eq!(thrown.type_name(), "DestroyedObjectError");
        assert_eq!(thrown.message(), "Object abc has been destroyed.");
        assert_eq!(BridgeError::from(thrown), original);
    }

    #[test]
    fn test_user_error_passes_through() {
        let thrown = ThrownError::generic("boom");
        let bridged = BridgeError::from(thrown.clone());
        assert_eq!(bridged.kind(), ErrorKind::User);
        assert_eq!(ThrownError::from(bridged), thrown);
    }
}

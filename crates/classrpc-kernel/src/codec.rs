//! Carries thrown errors across the bridge.
//!
//! Serializing keeps the runtime type name and every field. Deserializing
//! looks the type name up in a registry of factories and falls back to the
//! generic `Error` when the receiving side does not know the type. Message and
//! custom fields survive either way; only the type name can degrade.

use classrpc_types::envelope::ResultEnvelope;
use classrpc_types::error::{
    BridgeError, ErrorKind, SerializedError, ThrownError, GENERIC_ERROR, MESSAGE_FIELD,
};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Type name used for argument and return-value conversion failures.
pub const TYPE_ERROR: &str = "TypeError";

/// Builds a blank error of one type from its message.
pub type ErrorFactory = Arc<dyn Fn(&str) -> ThrownError + Send + Sync>;

/// Registry of error reconstruction factories.
pub struct ErrorCodec {
    factories: DashMap<String, ErrorFactory>,
}

impl ErrorCodec {
    /// Codec knowing the generic error, `TypeError` and the bridge's own kinds.
    pub fn new() -> Self {
        let codec = Self {
            factories: DashMap::new(),
        };
        codec.register_type(GENERIC_ERROR);
        codec.register_type(TYPE_ERROR);
        for kind in [
            ErrorKind::Conflict,
            ErrorKind::NotExported,
            ErrorKind::BadRequest,
            ErrorKind::DestroyedObject,
        ] {
            codec.register_type(kind.type_name());
        }
        codec
    }

    /// Register a factory for `type_name`, replacing any previous one.
    pub fn register(&self, type_name: impl Into<String>, factory: ErrorFactory) {
        self.factories.insert(type_name.into(), factory);
    }

    /// Register a plain error type that only needs its name preserved.
    pub fn register_type(&self, type_name: &str) {
        let name = type_name.to_string();
        self.register(
            type_name,
            Arc::new(move |message: &str| ThrownError::new(name.clone(), message)),
        );
    }

    /// Whether `type_name` can be reconstructed as itself.
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Capture a thrown error for the wire.
    pub fn serialize(err: &ThrownError) -> SerializedError {
        SerializedError::capture(err)
    }

    /// Rebuild the best local equivalent of a serialized error.
    pub fn deserialize(&self, err: &SerializedError) -> ThrownError {
        let message = err
            .fields
            .get(MESSAGE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut thrown = match self.factories.get(&err.constructor) {
            Some(factory) => (factory.value())(message),
            None => {
                debug!(
                    error_type = %err.constructor,
                    "Unregistered error type, reconstructing as {}", GENERIC_ERROR
                );
                ThrownError::generic(message)
            }
        };
        for (key, value) in &err.fields {
            thrown.set_field(key.clone(), value.clone());
        }
        thrown
    }

    /// Turn a failure envelope's error into the bridge taxonomy.
    pub fn to_bridge_error(&self, err: &SerializedError) -> BridgeError {
        BridgeError::from(self.deserialize(err))
    }

    /// Wrap a dispatch outcome into a Result Envelope.
    pub fn encode_result(result: Result<Value, BridgeError>) -> ResultEnvelope {
        match result {
            Ok(data) => ResultEnvelope::success(data),
            Err(e) => ResultEnvelope::failure(Self::serialize(&ThrownError::from(e))),
        }
    }

    /// Unwrap a Result Envelope, rebuilding its error on failure.
    pub fn decode_result(&self, result: ResultEnvelope) -> Result<Value, BridgeError> {
        match result.err {
            Some(err) => Err(self.to_bridge_error(&err)),
            None => Ok(result.data),
        }
    }
}

impl Default for ErrorCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn range_error() -> ThrownError {
        ThrownError::new("RangeError", "bad").with_field("code", 7)
    }

    #[test]
    fn test_registered_type_survives() {
        let codec = ErrorCodec::new();
        codec.register_type("RangeError");
        let back = codec.deserialize(&ErrorCodec::serialize(&range_error()));
        assert_eq!(back.type_name(), "RangeError");
        assert_eq!(back.message(), "bad");
        assert_eq!(back.field("code"), Some(&json!(7)));
    }

    #[test]
    fn test_unregistered_type_falls_back_to_generic() {
        let codec = ErrorCodec::new();
        assert!(!codec.is_registered("RangeError"));
        let back = codec.deserialize(&ErrorCodec::serialize(&range_error()));
        assert_eq!(back.type_name(), GENERIC_ERROR);
        assert_eq!(back.message(), "bad");
        assert_eq!(back.field("code"), Some(&json!(7)));
    }

    #[test]
    fn test_custom_factory_sets_defaults() {
        let codec = ErrorCodec::new();
        codec.register(
            "HttpError",
            Arc::new(|message: &str| {
                ThrownError::new("HttpError", message).with_field("status", 500)
            }),
        );
        let sent = ThrownError::new("HttpError", "nope").with_field("status", 404);
        let back = codec.deserialize(&ErrorCodec::serialize(&sent));
        // Captured fields win over factory defaults.
        assert_eq!(back.field("status"), Some(&json!(404)));
    }

    #[test]
    fn test_bridge_kinds_are_builtin() {
        let codec = ErrorCodec::new();
        let envelope =
            ErrorCodec::encode_result(Err(BridgeError::DestroyedObject("abc".to_string())));
        assert!(envelope.is_err());
        assert_eq!(
            codec.decode_result(envelope),
            Err(BridgeError::DestroyedObject("abc".to_string()))
        );
    }

    #[test]
    fn test_decode_success() {
        let codec = ErrorCodec::new();
        let envelope = ErrorCodec::encode_result(Ok(json!(23)));
        assert_eq!(codec.decode_result(envelope), Ok(json!(23)));
    }

    #[test]
    fn test_missing_message_field() {
        let codec = ErrorCodec::new();
        let err: SerializedError =
            serde_json::from_value(json!({"_constructor": "TypeError"})).unwrap();
        let back = codec.deserialize(&err);
        assert_eq!(back.type_name(), TYPE_ERROR);
        assert_eq!(back.message(), "");
    }
}

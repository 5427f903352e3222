//! Protocol envelopes.
//!
//! Every operation crossing the bridge is a [`CallEnvelope`]. On the wire it is
//! a flat JSON array:
//!
//! ```text
//! [className, callId, objectId, kind, member, ...args]
//! ```
//!
//! with `""` standing in for an absent call id (synchronous call) or object id
//! (static call). Kind `1` is a call (method, static, construct, destroy) and
//! kind `0` an accessor whose args are `["get"]` or `["set", value]`.

use crate::error::{BridgeError, SerializedError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Reserved member name for construction.
pub const CONSTRUCT_MEMBER: &str = "constructor";

/// Reserved member name for destruction.
pub const DESTROY_MEMBER: &str = "destructor";

/// Accessor operation name for reads.
pub const GET_OP: &str = "get";

/// Accessor operation name for writes.
pub const SET_OP: &str = "set";

/// Opaque identifier of a live origin-side object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub Uuid);

impl ObjectId {
    /// Create a new random ObjectId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a wire string.
    pub fn parse(s: &str) -> Result<Self, BridgeError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| BridgeError::BadRequest(format!("invalid object id '{s}': {e}")))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation id of an asynchronous call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    /// Create a new random CallId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a wire string.
    pub fn parse(s: &str) -> Result<Self, BridgeError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| BridgeError::BadRequest(format!("invalid call id '{s}': {e}")))
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Call kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Property get/set.
    Accessor = 0,
    /// Method call, static call, construct or destroy.
    Call = 1,
}

impl CallKind {
    fn from_wire(value: &Value) -> Result<Self, BridgeError> {
        match value.as_u64() {
            Some(0) => Ok(CallKind::Accessor),
            Some(1) => Ok(CallKind::Call),
            _ => Err(BridgeError::BadRequest(format!("invalid call kind: {value}"))),
        }
    }
}

/// Decoded accessor operation.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessorOp {
    /// Read the property.
    Get,
    /// Assign the property.
    Set(Value),
}

/// The unit of protocol exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>", into = "Vec<Value>")]
pub struct CallEnvelope {
    /// Exported class name.
    pub class_name: String,
    /// Present for asynchronous calls.
    pub call_id: Option<CallId>,
    /// Absent for static calls.
    pub object_id: Option<ObjectId>,
    /// Call or accessor.
    pub kind: CallKind,
    /// Member name (or a reserved lifecycle name).
    pub member: String,
    /// Ordered arguments.
    pub args: Vec<Value>,
}

impl CallEnvelope {
    /// Envelope constructing a new instance under `object_id`.
    pub fn construct(class_name: &str, object_id: ObjectId, args: Vec<Value>) -> Self {
        Self::call(class_name, Some(object_id), CONSTRUCT_MEMBER, args)
    }

    /// Envelope releasing `object_id`.
    pub fn destroy(class_name: &str, object_id: ObjectId) -> Self {
        Self::call(class_name, Some(object_id), DESTROY_MEMBER, Vec::new())
    }

    /// Method call envelope; `object_id: None` targets a static method.
    pub fn call(
        class_name: &str,
        object_id: Option<ObjectId>,
        member: &str,
        args: Vec<Value>,
    ) -> Self {
        Self {
            class_name: class_name.to_string(),
            call_id: None,
            object_id,
            kind: CallKind::Call,
            member: member.to_string(),
            args,
        }
    }

    /// Property read envelope.
    pub fn get(class_name: &str, object_id: Option<ObjectId>, property: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            call_id: None,
            object_id,
            kind: CallKind::Accessor,
            member: property.to_string(),
            args: vec![Value::String(GET_OP.to_string())],
        }
    }

    /// Property write envelope.
    pub fn set(class_name: &str, object_id: Option<ObjectId>, property: &str, value: Value) -> Self {
        Self {
            class_name: class_name.to_string(),
            call_id: None,
            object_id,
            kind: CallKind::Accessor,
            member: property.to_string(),
            args: vec![Value::String(SET_OP.to_string()), value],
        }
    }

    /// Mark this envelope asynchronous under the given correlation id.
    pub fn with_call_id(mut self, call_id: CallId) -> Self {
        self.call_id = Some(call_id);
        self
    }

    /// Whether the caller expects an asynchronous reply.
    pub fn is_async(&self) -> bool {
        self.call_id.is_some()
    }

    /// Whether this is a construct or destroy envelope.
    pub fn is_lifecycle(&self) -> bool {
        self.kind == CallKind::Call
            && (self.member == CONSTRUCT_MEMBER || self.member == DESTROY_MEMBER)
    }

    /// Decode the accessor operation from the args.
    pub fn accessor_op(&self) -> Result<AccessorOp, BridgeError> {
        match self.args.first().and_then(Value::as_str) {
            Some(GET_OP) => Ok(AccessorOp::Get),
            Some(SET_OP) => match self.args.get(1) {
                Some(value) => Ok(AccessorOp::Set(value.clone())),
                None => Err(BridgeError::BadRequest(format!(
                    "set of '{}' carries no value",
                    self.member
                ))),
            },
            other => Err(BridgeError::BadRequest(format!(
                "unknown accessor operation {other:?} on '{}'",
                self.member
            ))),
        }
    }
}

fn optional_id(value: Option<&Value>, what: &str) -> Result<Option<String>, BridgeError> {
    match value {
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Null) => Ok(None),
        other => Err(BridgeError::BadRequest(format!("invalid {what}: {other:?}"))),
    }
}

impl From<CallEnvelope> for Vec<Value> {
    fn from(env: CallEnvelope) -> Self {
        let mut out = Vec::with_capacity(5 + env.args.len());
        out.push(Value::String(env.class_name));
        out.push(Value::String(
            env.call_id.map(|id| id.to_string()).unwrap_or_default(),
        ));
        out.push(Value::String(
            env.object_id.map(|id| id.to_string()).unwrap_or_default(),
        ));
        out.push(Value::from(env.kind as u8));
        out.push(Value::String(env.member));
        out.extend(env.args);
        out
    }
}

impl TryFrom<Vec<Value>> for CallEnvelope {
    type Error = BridgeError;

    fn try_from(values: Vec<Value>) -> Result<Self, Self::Error> {
        if values.len() < 5 {
            return Err(BridgeError::BadRequest(format!(
                "envelope has {} fields, expected at least 5",
                values.len()
            )));
        }
        let class_name = values[0]
            .as_str()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BridgeError::BadRequest("missing class name".to_string()))?
            .to_string();
        let call_id = optional_id(values.get(1), "call id")?
            .map(|s| CallId::parse(&s))
            .transpose()?;
        let object_id = optional_id(values.get(2), "object id")?
            .map(|s| ObjectId::parse(&s))
            .transpose()?;
        let kind = CallKind::from_wire(&values[3])?;
        let member = values[4]
            .as_str()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BridgeError::BadRequest("missing member name".to_string()))?
            .to_string();
        let args = values.into_iter().skip(5).collect();

        Ok(Self {
            class_name,
            call_id,
            object_id,
            kind,
            member,
            args,
        })
    }
}

/// Either a success value or a serialized error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// Present on failure.
    pub err: Option<SerializedError>,
    /// The success value (null on failure).
    #[serde(default)]
    pub data: Value,
}

impl ResultEnvelope {
    /// A successful result.
    pub fn success(data: Value) -> Self {
        Self { err: None, data }
    }

    /// A failed result.
    pub fn failure(err: SerializedError) -> Self {
        Self {
            err: Some(err),
            data: Value::Null,
        }
    }

    /// Whether this result signals failure.
    pub fn is_err(&self) -> bool {
        self.err.is_some()
    }
}

/// Asynchronous response: `[callId, result]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallReply(pub CallId, pub ResultEnvelope);

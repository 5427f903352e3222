//! Moves call envelopes and result envelopes between the two halves.
//!
//! Topics:
//! - `classrpc:call`: a [`CallEnvelope`]. Sent as a request for synchronous
//!   calls (the reply is the [`ResultEnvelope`]) and as a notification for
//!   asynchronous ones, which are answered with a [`CallReply`] notification on
//!   `classrpc:reply:<call_id>`.
//! - `classrpc:import`, `classrpc:list`, `classrpc:remove`: administrative
//!   requests, always synchronous, answered with a `ResultEnvelope`.

use crate::codec::ErrorCodec;
use crate::error::RpcResult;
use crate::exporter::Exporter;
use async_trait::async_trait;
use classrpc_types::envelope::{CallEnvelope, CallId, CallReply, ResultEnvelope};
use classrpc_types::error::{BridgeError, ThrownError};
use classrpc_types::surface::ClassSurface;
use classrpc_wire::{MessageHandler, Outbox, Subscription, Transport, WireError};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// Topic carrying call envelopes.
pub const CALL_TOPIC: &str = "classrpc:call";
/// Topic fetching a class surface.
pub const IMPORT_TOPIC: &str = "classrpc:import";
/// Topic listing exported classes.
pub const LIST_TOPIC: &str = "classrpc:list";
/// Topic removing an exported class.
pub const REMOVE_TOPIC: &str = "classrpc:remove";

/// Topic on which the reply to an asynchronous call arrives.
pub fn reply_topic(call_id: &CallId) -> String {
    format!("classrpc:reply:{call_id}")
}

/// Failure envelope standing in for a result too large to send.
fn oversized_result(error: &WireError) -> ResultEnvelope {
    ErrorCodec::encode_result(Err(BridgeError::User(ThrownError::generic(
        error.to_string(),
    ))))
}

fn send_reply(
    outbox: &Outbox,
    topic: &str,
    call_id: CallId,
    result: ResultEnvelope,
) -> Result<(), WireError> {
    let reply = serde_json::to_value(CallReply(call_id, result))?;
    outbox.send(topic, reply)
}

fn to_payload(result: &ResultEnvelope) -> Value {
    serde_json::to_value(result).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to encode result envelope");
        Value::Null
    })
}

// ---------------------------------------------------------------------------
// Origin side
// ---------------------------------------------------------------------------

/// Feeds messages arriving at the origin into an [`Exporter`].
pub struct OriginRouter {
    exporter: Arc<Exporter>,
}

impl OriginRouter {
    pub fn new(exporter: Arc<Exporter>) -> Self {
        Self { exporter }
    }

    pub fn exporter(&self) -> &Arc<Exporter> {
        &self.exporter
    }

    fn class_name(payload: Value) -> Result<String, BridgeError> {
        match payload {
            Value::String(name) if !name.is_empty() => Ok(name),
            other => Err(BridgeError::BadRequest(format!(
                "expected a class name, got {other}"
            ))),
        }
    }

    fn import(&self, payload: Value) -> Result<Value, BridgeError> {
        let name = Self::class_name(payload)?;
        let surface = self
            .exporter
            .surface(&name)
            .ok_or(BridgeError::NotExported(name))?;
        serde_json::to_value(surface).map_err(|e| BridgeError::BadRequest(e.to_string()))
    }

    fn remove(&self, payload: Value) -> Result<Value, BridgeError> {
        let name = Self::class_name(payload)?;
        Ok(Value::Bool(self.exporter.unexport_class(&name)))
    }
}

#[async_trait]
impl MessageHandler for OriginRouter {
    async fn handle_request(&self, topic: &str, payload: Value) -> Value {
        let result = match topic {
            CALL_TOPIC => match serde_json::from_value::<CallEnvelope>(payload) {
                Ok(envelope) => return to_payload(&self.exporter.dispatch(envelope).await),
                Err(e) => Err(BridgeError::BadRequest(e.to_string())),
            },
            IMPORT_TOPIC => self.import(payload),
            LIST_TOPIC => Ok(Value::from(self.exporter.list_classes())),
            REMOVE_TOPIC => self.remove(payload),
            other => {
                warn!(topic = %other, "Request on unknown topic");
                Err(BridgeError::BadRequest(format!("unknown topic: {other}")))
            }
        };
        to_payload(&ErrorCodec::encode_result(result))
    }

    async fn handle_notification(&self, topic: &str, payload: Value, outbox: &Outbox) {
        if topic != CALL_TOPIC {
            warn!(topic = %topic, "Notification on unknown topic dropped");
            return;
        }
        let envelope = match serde_json::from_value::<CallEnvelope>(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Malformed async envelope dropped");
                return;
            }
        };
        let Some(call_id) = envelope.call_id else {
            warn!(
                class = %envelope.class_name,
                member = %envelope.member,
                "Async envelope without call id dropped"
            );
            return;
        };

        let result = self.exporter.dispatch(envelope).await;
        let topic = reply_topic(&call_id);
        let sent = match send_reply(outbox, &topic, call_id, result) {
            Err(e @ WireError::MessageTooLarge { .. }) => {
                warn!(call_id = %call_id, error = %e, "Async result over frame limit");
                send_reply(outbox, &topic, call_id, oversized_result(&e))
            }
            other => other,
        };
        match sent {
            Ok(()) => {}
            Err(WireError::ConnectionClosed) => {
                debug!(call_id = %call_id, "Consumer gone before async reply");
            }
            Err(e) => warn!(call_id = %call_id, error = %e, "Failed to send call reply"),
        }
    }

    fn oversized_reply(&self, _topic: &str, error: &WireError) -> Value {
        to_payload(&oversized_result(error))
    }
}

// ---------------------------------------------------------------------------
// Consumer side
// ---------------------------------------------------------------------------

/// Sends envelopes over a [`Transport`] and correlates the replies.
pub struct CallRouter {
    transport: Arc<dyn Transport>,
    codec: Arc<ErrorCodec>,
}

impl CallRouter {
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<ErrorCodec>) -> Self {
        Self { transport, codec }
    }

    pub fn codec(&self) -> &Arc<ErrorCodec> {
        &self.codec
    }

    /// Send a synchronous envelope and block until its result arrives.
    pub fn call_sync(&self, envelope: CallEnvelope) -> RpcResult<Value> {
        let payload = serde_json::to_value(&envelope)?;
        self.request(CALL_TOPIC, payload)
    }

    /// Send an envelope asynchronously under a fresh call id.
    pub fn call_async(&self, envelope: CallEnvelope) -> RpcResult<PendingCall> {
        let call_id = CallId::new();
        let envelope = envelope.with_call_id(call_id);
        let payload = serde_json::to_value(&envelope)?;
        let topic = reply_topic(&call_id);

        // Subscribe before sending so a fast reply cannot slip past.
        let first = self.transport.once(&topic)?;
        self.transport.send(CALL_TOPIC, payload)?;

        let reply = await_reply(
            Arc::clone(&self.transport),
            Arc::clone(&self.codec),
            call_id,
            first,
        );
        Ok(PendingCall {
            call_id,
            reply: reply.boxed(),
        })
    }

    /// Fetch the surface of an exported class.
    pub fn import(&self, class_name: &str) -> RpcResult<ClassSurface> {
        self.admin(IMPORT_TOPIC, Value::from(class_name))
    }

    /// Names of the exported classes.
    pub fn list(&self) -> RpcResult<Vec<String>> {
        self.admin(LIST_TOPIC, Value::Null)
    }

    /// Remove an exported class on the origin side.
    pub fn remove(&self, class_name: &str) -> RpcResult<bool> {
        self.admin(REMOVE_TOPIC, Value::from(class_name))
    }

    fn admin<T: DeserializeOwned>(&self, topic: &str, payload: Value) -> RpcResult<T> {
        let data = self.request(topic, payload)?;
        Ok(serde_json::from_value(data)?)
    }

    fn request(&self, topic: &str, payload: Value) -> RpcResult<Value> {
        let reply = self.transport.send_sync(topic, payload)?;
        let result: ResultEnvelope = serde_json::from_value(reply)?;
        Ok(self.codec.decode_result(result)?)
    }
}

/// Wait on the reply topic of `call_id` until its own reply shows up.
async fn await_reply(
    transport: Arc<dyn Transport>,
    codec: Arc<ErrorCodec>,
    call_id: CallId,
    first: Subscription,
) -> RpcResult<Value> {
    let topic = reply_topic(&call_id);
    let mut subscription = first;
    loop {
        let payload = subscription
            .await
            .map_err(|_| WireError::ConnectionClosed)?;
        match serde_json::from_value::<CallReply>(payload) {
            Ok(CallReply(id, result)) if id == call_id => {
                return Ok(codec.decode_result(result)?);
            }
            Ok(CallReply(id, _)) => {
                debug!(expected = %call_id, got = %id, "Dropping mismatched reply");
            }
            Err(e) => warn!(call_id = %call_id, error = %e, "Malformed call reply"),
        }
        subscription = transport.once(&topic)?;
    }
}

/// Handle to an asynchronous call; resolves with the call's result.
pub struct PendingCall {
    call_id: CallId,
    reply: BoxFuture<'static, RpcResult<Value>>,
}

impl PendingCall {
    /// Correlation id of this call.
    pub fn call_id(&self) -> CallId {
        self.call_id
    }
}

impl Future for PendingCall {
    type Output = RpcResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.reply.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("call_id", &self.call_id)
            .finish_non_exhaustive()
    }
}

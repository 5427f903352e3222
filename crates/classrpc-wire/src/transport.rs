//! Transport traits shared by both sides of the bridge.
//!
//! The consumer side talks through a [`Transport`]: three primitives, no more.
//! The origin side implements [`MessageHandler`] and answers through an
//! [`Outbox`].

use crate::message::{encode_frame, WireMessage};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Errors from the wire layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("No reply within {0:?}")]
    Timeout(Duration),
}

/// A pending single-message subscription.
pub type Subscription = oneshot::Receiver<Value>;

/// Consumer-side channel to the origin.
pub trait Transport: Send + Sync + 'static {
    /// Fire-and-forget send.
    fn send(&self, topic: &str, payload: Value) -> Result<(), WireError>;

    /// Send and block the calling thread until the origin replies.
    fn send_sync(&self, topic: &str, payload: Value) -> Result<Value, WireError>;

    /// Subscribe to the next message arriving on `topic`.
    ///
    /// Messages arriving on a topic nobody is subscribed to are dropped.
    fn once(&self, topic: &str) -> Result<Subscription, WireError>;
}

/// Origin-side handler for incoming messages.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Answer a blocking request. The returned payload is sent back as the reply.
    async fn handle_request(&self, topic: &str, payload: Value) -> Value;

    /// Handle a one-way message. Replies, if any, go out through `outbox`.
    async fn handle_notification(&self, topic: &str, payload: Value, outbox: &Outbox);

    /// Reply sent instead of an answer to `topic` that does not fit in one frame.
    fn oversized_reply(&self, _topic: &str, _error: &WireError) -> Value {
        Value::Null
    }
}

/// Outgoing queue of an origin-side connection, holding encoded frames.
///
/// Messages over the frame limit are refused at the queue, so one oversized
/// answer fails alone instead of tearing the connection down.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    max_message_size: u32,
}

impl Outbox {
    /// Create an outbox and the receiving end of its queue.
    pub fn channel(max_message_size: u32) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                max_message_size,
            },
            rx,
        )
    }

    /// Queue a notification to the consumer.
    pub fn send(&self, topic: &str, payload: Value) -> Result<(), WireError> {
        self.push(WireMessage::notification(topic, payload))
    }

    /// Queue the reply to request `id`.
    pub(crate) fn respond(&self, id: String, payload: Value) -> Result<(), WireError> {
        self.push(WireMessage::response(id, payload))
    }

    fn push(&self, msg: WireMessage) -> Result<(), WireError> {
        let frame = encode_frame(&msg, self.max_message_size)?;
        self.tx.send(frame).map_err(|_| WireError::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MAX_MESSAGE_SIZE;
    use crate::message::{decode_frame, WireMessageKind};
    use serde_json::json;

    #[test]
    fn test_outbox_queues_notifications() {
        let (outbox, mut rx) = Outbox::channel(MAX_MESSAGE_SIZE);
        outbox.send("reply", json!([1, 2])).unwrap();
        let msg = decode_frame(&rx.try_recv().unwrap()).unwrap();
        match msg.kind {
            WireMessageKind::Notification { topic, payload } => {
                assert_eq!(topic, "reply");
                assert_eq!(payload, json!([1, 2]));
            }
            other => panic!("Expected Notification, got {other:?}"),
        }
    }

    #[test]
    fn test_outbox_closed() {
        let (outbox, rx) = Outbox::channel(MAX_MESSAGE_SIZE);
        drop(rx);
        assert!(matches!(
            outbox.send("reply", Value::Null),
            Err(WireError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_outbox_refuses_oversized_frame() {
        let (outbox, mut rx) = Outbox::channel(32);
        assert!(matches!(
            outbox.send("reply", json!("x".repeat(64))),
            Err(WireError::MessageTooLarge { max: 32, .. })
        ));
        assert!(rx.try_recv().is_err());

        // Frames that fit still go through.
        outbox.send("r", json!(1)).unwrap();
        assert!(rx.try_recv().is_ok());
    }
}

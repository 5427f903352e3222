//! Wire protocol message types.
//!
//! Every frame is a 4-byte big-endian length header followed by a JSON body.
//! Requests expect exactly one response carrying the same `id`; notifications
//! are one-way in either direction.

use crate::transport::WireError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A wire protocol message (envelope).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Unique message ID. Responses reuse the ID of their request.
    pub id: String,
    /// Message variant.
    #[serde(flatten)]
    pub kind: WireMessageKind,
}

/// The different kinds of wire messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessageKind {
    /// Blocking request; the sender waits for the response.
    #[serde(rename = "request")]
    Request { topic: String, payload: Value },
    /// Reply to a request.
    #[serde(rename = "response")]
    Response { payload: Value },
    /// One-way message (no response expected).
    #[serde(rename = "notification")]
    Notification { topic: String, payload: Value },
}

impl WireMessage {
    /// A new request with a fresh ID.
    pub fn request(topic: &str, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: WireMessageKind::Request {
                topic: topic.to_string(),
                payload,
            },
        }
    }

    /// The response to the request with ID `id`.
    pub fn response(id: String, payload: Value) -> Self {
        Self {
            id,
            kind: WireMessageKind::Response { payload },
        }
    }

    /// A new notification with a fresh ID.
    pub fn notification(topic: &str, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: WireMessageKind::Notification {
                topic: topic.to_string(),
                payload,
            },
        }
    }
}

/// Encode a wire message to bytes (4-byte big-endian length + JSON).
pub fn encode_message(msg: &WireMessage) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = json.len() as u32;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Encode `msg` into a frame, refusing bodies larger than `max_size`.
pub fn encode_frame(msg: &WireMessage, max_size: u32) -> Result<Vec<u8>, WireError> {
    let bytes = encode_message(msg)?;
    let size = u32::try_from(bytes.len() - 4).unwrap_or(u32::MAX);
    if size > max_size {
        return Err(WireError::MessageTooLarge {
            size,
            max: max_size,
        });
    }
    Ok(bytes)
}

/// Parse a complete frame as produced by [`encode_frame`].
pub fn decode_frame(frame: &[u8]) -> Result<WireMessage, WireError> {
    let body = frame
        .get(4..)
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))?;
    Ok(decode_message(body)?)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON body into a WireMessage.
pub fn decode_message(body: &[u8]) -> Result<WireMessage, serde_json::Error> {
    serde_json::from_slice(body)
}

/// Read one framed message. A clean EOF before the header is `ConnectionClosed`.
pub async fn read_message<R>(reader: &mut R, max_size: u32) -> Result<WireMessage, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }
    let len = decode_length(&header);
    if len > max_size {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: max_size,
        });
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(decode_message(&body)?)
}

/// Write one framed message and flush.
pub async fn write_message<W>(writer: &mut W, msg: &WireMessage) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_message(msg)?;
    write_frame(writer, &bytes).await
}

/// Write one already encoded frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

//! Consumer-side [`Transport`] over a byte stream.
//!
//! The stream is owned by a dedicated I/O thread running a current-thread
//! tokio runtime. Callers never touch the stream directly: outgoing messages
//! are encoded and size-checked on the caller's thread, then queued to the
//! I/O thread. Blocking replies come back through a per-request channel and
//! notifications are handed to `once` subscribers. A message over the frame
//! limit fails only its own call.
//! Because the I/O never runs on the caller's thread, a blocking `send_sync`
//! is safe from plain threads and from inside async tasks alike.

use crate::message::{encode_frame, read_message, write_frame, WireMessage, WireMessageKind};
use crate::transport::{Subscription, Transport, WireError};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Maximum single message size (16 MB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Configuration for a StreamTransport.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest frame sent to or accepted from the origin.
    pub max_message_size: u32,
    /// Upper bound on a blocking request. `None` waits forever.
    pub sync_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            sync_timeout: None,
        }
    }
}

/// State shared between callers and the I/O thread.
#[derive(Default)]
struct Shared {
    /// Blocking requests awaiting their response, keyed by message ID.
    pending: Mutex<HashMap<String, std_mpsc::Sender<Value>>>,
    /// `once` subscribers keyed by topic.
    subscribers: Mutex<HashMap<String, Vec<oneshot::Sender<Value>>>>,
    closed: AtomicBool,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark closed and drop every waiter so blocked callers wake up.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn route(&self, msg: WireMessage) {
        match msg.kind {
            WireMessageKind::Response { payload } => {
                let waiter = self
                    .pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&msg.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(payload);
                    }
                    None => debug!(id = %msg.id, "dropping response with no pending request"),
                }
            }
            WireMessageKind::Notification { topic, payload } => {
                let waiters = self
                    .subscribers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&topic);
                match waiters {
                    Some(waiters) => {
                        for tx in waiters {
                            let _ = tx.send(payload.clone());
                        }
                    }
                    None => debug!(topic = %topic, "dropping notification with no subscriber"),
                }
            }
            WireMessageKind::Request { topic, .. } => {
                warn!(topic = %topic, id = %msg.id, "unexpected request on consumer connection");
            }
        }
    }
}

/// Consumer-side transport over a byte stream.
pub struct StreamTransport {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    shared: Arc<Shared>,
    max_message_size: u32,
    sync_timeout: Option<Duration>,
}

impl StreamTransport {
    /// Drive `stream` on a new I/O thread.
    pub fn spawn<S>(stream: S, config: ConnectionConfig) -> Result<Self, WireError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::launch(move || async move { Ok::<S, std::io::Error>(stream) }, config)
    }

    /// Connect to an origin listening on `addr`.
    pub fn connect_tcp(addr: SocketAddr, config: ConnectionConfig) -> Result<Self, WireError> {
        debug!("connecting to origin at {}", addr);
        Self::launch(move || TcpStream::connect(addr), config)
    }

    fn launch<S, F, Fut>(open: F, config: ConnectionConfig) -> Result<Self, WireError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::io::Result<S>>,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let (ready_tx, ready_rx) = std_mpsc::channel::<std::io::Result<()>>();

        let io_shared = Arc::clone(&shared);
        let max_size = config.max_message_size;
        std::thread::Builder::new()
            .name("classrpc-io".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                runtime.block_on(async move {
                    let stream = match open().await {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    if let Err(e) = io_loop(stream, outgoing_rx, &io_shared, max_size).await {
                        debug!("connection to origin ended: {}", e);
                    }
                    io_shared.close();
                });
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                outgoing,
                shared,
                max_message_size: config.max_message_size,
                sync_timeout: config.sync_timeout,
            }),
            Ok(Err(e)) => Err(WireError::Io(e)),
            Err(_) => Err(WireError::ConnectionClosed),
        }
    }

    /// Whether the connection has shut down.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl Transport for StreamTransport {
    fn send(&self, topic: &str, payload: Value) -> Result<(), WireError> {
        let frame = encode_frame(
            &WireMessage::notification(topic, payload),
            self.max_message_size,
        )?;
        self.outgoing
            .send(frame)
            .map_err(|_| WireError::ConnectionClosed)
    }

    fn send_sync(&self, topic: &str, payload: Value) -> Result<Value, WireError> {
        let msg = WireMessage::request(topic, payload);
        let frame = encode_frame(&msg, self.max_message_size)?;
        let id = msg.id;
        let (tx, rx) = std_mpsc::channel();
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), tx);

        let forget = || {
            self.shared
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
        };

        if self.shared.is_closed() || self.outgoing.send(frame).is_err() {
            forget();
            return Err(WireError::ConnectionClosed);
        }

        let reply = match self.sync_timeout {
            Some(timeout) => rx.recv_timeout(timeout).map_err(|e| match e {
                std_mpsc::RecvTimeoutError::Timeout => WireError::Timeout(timeout),
                std_mpsc::RecvTimeoutError::Disconnected => WireError::ConnectionClosed,
            }),
            None => rx.recv().map_err(|_| WireError::ConnectionClosed),
        };
        if reply.is_err() {
            forget();
        }
        reply
    }

    fn once(&self, topic: &str) -> Result<Subscription, WireError> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        if self.shared.is_closed() {
            return Err(WireError::ConnectionClosed);
        }
        Ok(rx)
    }
}

/// Pump outgoing messages to the stream and route incoming ones until either
/// direction ends.
async fn io_loop<S>(
    stream: S,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: &Shared,
    max_size: u32,
) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let write_side = async {
        while let Some(frame) = outgoing.recv().await {
            write_frame(&mut writer, &frame).await?;
        }
        Ok::<(), WireError>(())
    };

    let read_side = async {
        loop {
            match read_message(&mut reader, max_size).await {
                Ok(msg) => shared.route(msg),
                Err(WireError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    };

    tokio::select! {
        result = write_side => result,
        result = read_side => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::write_message;
    use serde_json::json;

    /// Answers every request by echoing its payload; echoes notifications back
    /// on `<topic>:echo`.
    async fn echo_peer(stream: tokio::io::DuplexStream) {
        let (mut reader, mut writer) = tokio::io::split(stream);
        while let Ok(msg) = read_message(&mut reader, MAX_MESSAGE_SIZE).await {
            let reply = match msg.kind {
                WireMessageKind::Request { payload, .. } => WireMessage::response(msg.id, payload),
                WireMessageKind::Notification { topic, payload } => {
                    WireMessage::notification(&format!("{topic}:echo"), payload)
                }
                WireMessageKind::Response { .. } => continue,
            };
            if write_message(&mut writer, &reply).await.is_err() {
                break;
            }
        }
    }

    fn spawn_echo() -> StreamTransport {
        let (client, server) = tokio::io::duplex(64 * 1024);
        std::thread::spawn(move || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
                .block_on(echo_peer(server));
        });
        StreamTransport::spawn(client, ConnectionConfig::default()).unwrap()
    }

    #[test]
    fn test_send_sync_roundtrip() {
        let transport = spawn_echo();
        let reply = transport.send_sync("any", json!({"n": 1})).unwrap();
        assert_eq!(reply, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_once_receives_notification() {
        let transport = spawn_echo();
        let sub = transport.once("ping:echo").unwrap();
        transport.send("ping", json!("hello")).unwrap();
        assert_eq!(sub.await.unwrap(), json!("hello"));
    }

    #[tokio::test]
    async fn test_once_fires_only_once() {
        let transport = spawn_echo();
        let first = transport.once("ping:echo").unwrap();
        transport.send("ping", json!(1)).unwrap();
        assert_eq!(first.await.unwrap(), json!(1));

        // Second message on the same topic needs a fresh subscription.
        let second = transport.once("ping:echo").unwrap();
        transport.send("ping", json!(2)).unwrap();
        assert_eq!(second.await.unwrap(), json!(2));
    }

    #[test]
    fn test_subscription_awaited_outside_runtime() {
        let transport = spawn_echo();
        let sub = transport.once("ping:echo").unwrap();
        transport.send("ping", json!("plain")).unwrap();
        assert_eq!(tokio_test::block_on(sub).unwrap(), json!("plain"));
    }

    #[test]
    fn test_oversized_send_fails_alone() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        std::thread::spawn(move || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
                .block_on(echo_peer(server));
        });
        let config = ConnectionConfig {
            max_message_size: 256,
            ..Default::default()
        };
        let transport = StreamTransport::spawn(client, config).unwrap();

        let big = json!("x".repeat(1024));
        assert!(matches!(
            transport.send_sync("t", big.clone()),
            Err(WireError::MessageTooLarge { max: 256, .. })
        ));
        assert!(matches!(
            transport.send("t", big),
            Err(WireError::MessageTooLarge { .. })
        ));
        assert!(!transport.is_closed());
        assert_eq!(transport.send_sync("t", json!("ok")).unwrap(), json!("ok"));
    }

    #[test]
    fn test_closed_connection_fails_fast() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let transport = StreamTransport::spawn(client, ConnectionConfig::default()).unwrap();
        assert!(matches!(
            transport.send_sync("t", Value::Null),
            Err(WireError::ConnectionClosed)
        ));
        assert!(transport.is_closed());
    }

    #[test]
    fn test_sync_timeout() {
        // Peer that never answers.
        let (client, _server) = tokio::io::duplex(1024);
        let config = ConnectionConfig {
            sync_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let transport = StreamTransport::spawn(client, config).unwrap();
        assert!(matches!(
            transport.send_sync("t", Value::Null),
            Err(WireError::Timeout(_))
        ));
    }
}

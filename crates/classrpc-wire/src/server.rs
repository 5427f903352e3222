//! Origin-side dispatch loop and TCP listener.
//!
//! [`serve`] reads frames from one connection and hands each to the
//! [`MessageHandler`] on its own task, so a deferred answer never holds up
//! later messages. Replies are funnelled through a single writer task; an
//! answer over the frame limit is swapped for
//! [`MessageHandler::oversized_reply`].
//!
//! [`spawn_server`] and [`listen_tcp`] serve every connection on its own
//! thread with a current-thread runtime, so dispatch is single-threaded no
//! matter which runtime the caller runs on.

use crate::message::{read_message, write_frame, WireMessageKind};
use crate::transport::{MessageHandler, Outbox, WireError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Serve one connection until the consumer hangs up.
pub async fn serve<S>(
    stream: S,
    handler: Arc<dyn MessageHandler>,
    max_message_size: u32,
) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (outbox, mut queue) = Outbox::channel(max_message_size);

    // The writer outlives the read loop while spawned handlers still hold
    // outbox clones.
    tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                debug!("origin writer stopped: {}", e);
                break;
            }
        }
    });

    loop {
        let msg = match read_message(&mut reader, max_message_size).await {
            Ok(m) => m,
            Err(WireError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };

        match msg.kind {
            WireMessageKind::Request { topic, payload } => {
                let handler = Arc::clone(&handler);
                let outbox = outbox.clone();
                let id = msg.id;
                tokio::spawn(async move {
                    let reply = handler.handle_request(&topic, payload).await;
                    let sent = match outbox.respond(id.clone(), reply) {
                        Err(e @ WireError::MessageTooLarge { .. }) => {
                            warn!(topic = %topic, error = %e, "reply over frame limit replaced");
                            outbox.respond(id, handler.oversized_reply(&topic, &e))
                        }
                        other => other,
                    };
                    if let Err(e) = sent {
                        debug!(topic = %topic, error = %e, "reply not delivered");
                    }
                });
            }
            WireMessageKind::Notification { topic, payload } => {
                let handler = Arc::clone(&handler);
                let outbox = outbox.clone();
                tokio::spawn(async move {
                    handler.handle_notification(&topic, payload, &outbox).await;
                });
            }
            WireMessageKind::Response { .. } => {
                warn!(id = %msg.id, "unexpected response on origin connection");
            }
        }
    }
}

/// Serve one connection on a dedicated thread with a current-thread runtime.
pub fn spawn_server<S>(
    stream: S,
    handler: Arc<dyn MessageHandler>,
    max_message_size: u32,
) -> std::io::Result<std::thread::JoinHandle<Result<(), WireError>>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    std::thread::Builder::new()
        .name("classrpc-origin".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(serve(stream, handler, max_message_size))
        })
}

/// Bind `addr` and serve every accepted connection with `handler`.
///
/// Must be called inside a tokio runtime. Only the accept loop runs there;
/// each connection gets its own thread and current-thread runtime. Returns the
/// bound address (useful when binding to port 0) and the accept loop's task
/// handle.
pub async fn listen_tcp(
    addr: SocketAddr,
    handler: Arc<dyn MessageHandler>,
    max_message_size: u32,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), WireError> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!("classrpc: listening on {}", local_addr);

    let accept_handle = tokio::spawn(accept_loop(listener, handler, max_message_size));
    Ok((local_addr, accept_handle))
}

async fn accept_loop(listener: TcpListener, handler: Arc<dyn MessageHandler>, max_size: u32) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("classrpc: accepted connection from {}", addr);
                if let Err(e) = serve_on_thread(stream, addr, Arc::clone(&handler), max_size) {
                    error!("classrpc: cannot serve {}: {}", addr, e);
                }
            }
            Err(e) => {
                error!("classrpc: accept error: {}", e);
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Move an accepted connection onto its own thread and current-thread runtime.
fn serve_on_thread(
    stream: TcpStream,
    addr: SocketAddr,
    handler: Arc<dyn MessageHandler>,
    max_size: u32,
) -> std::io::Result<()> {
    let stream = stream.into_std()?;
    std::thread::Builder::new()
        .name(format!("classrpc-origin-{addr}"))
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("classrpc: no runtime for {}: {}", addr, e);
                    return;
                }
            };
            let result = runtime.block_on(async move {
                let stream = TcpStream::from_std(stream)?;
                serve(stream, handler, max_size).await
            });
            if let Err(e) = result {
                debug!("classrpc: connection from {} ended: {}", addr, e);
            }
        })?;
    Ok(())
}

//! Wiring an [`Exporter`] to [`Importer`]s over the stream transport.

use crate::error::RpcResult;
use crate::exporter::Exporter;
use crate::importer::Importer;
use crate::router::OriginRouter;
use classrpc_types::config::BridgeConfig;
use classrpc_wire::{spawn_server, ConnectionConfig, StreamTransport, WireError};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// In-memory pipe capacity for in-process pairs.
const LOCAL_PIPE_CAPACITY: usize = 256 * 1024;

fn connection_config(config: &BridgeConfig) -> ConnectionConfig {
    ConnectionConfig {
        max_message_size: config.max_message_size,
        sync_timeout: config.sync_call_timeout(),
    }
}

/// Pair an importer with `exporter` inside this process.
///
/// The origin side runs on its own thread with a current-thread runtime and
/// stops once the importer (and every proxy it handed out) is dropped.
pub fn connect_local(exporter: Arc<Exporter>, config: &BridgeConfig) -> RpcResult<Importer> {
    let (consumer, origin) = tokio::io::duplex(LOCAL_PIPE_CAPACITY);
    let router = Arc::new(OriginRouter::new(exporter));
    spawn_server(origin, router, config.max_message_size).map_err(WireError::from)?;
    let transport = StreamTransport::spawn(consumer, connection_config(config))?;
    Ok(Importer::new(Arc::new(transport)))
}

/// Connect an importer to an origin listening on `addr`.
pub fn connect_tcp(addr: SocketAddr, config: &BridgeConfig) -> RpcResult<Importer> {
    let transport = StreamTransport::connect_tcp(addr, connection_config(config))?;
    info!("Connected to origin at {}", addr);
    Ok(Importer::new(Arc::new(transport)))
}

/// Serve `exporter` on `addr`. Must be called inside a tokio runtime.
pub async fn serve_tcp(
    exporter: Arc<Exporter>,
    addr: SocketAddr,
    config: &BridgeConfig,
) -> RpcResult<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = Arc::new(OriginRouter::new(exporter));
    Ok(classrpc_wire::listen_tcp(addr, router, config.max_message_size).await?)
}

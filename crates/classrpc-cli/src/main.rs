//! classrpc CLI: talks to a running origin over TCP.

mod cli;

use crate::cli::{Cli, Commands};
use classrpc_kernel::config::load_config;
use classrpc_kernel::{connect_tcp, Importer, RpcResult};
use classrpc_types::config::BridgeConfig;
use clap::Parser;
use serde::Serialize;
use tracing::debug;

fn init_tracing_stderr(config: &BridgeConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());
    init_tracing_stderr(&config);

    if let Err(e) = run(&cli, &config) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli, config: &BridgeConfig) -> Result<(), String> {
    let addr = match cli.connect {
        Some(addr) => addr,
        None => config
            .listen_addr
            .parse()
            .map_err(|e| format!("invalid listen_addr '{}': {e}", config.listen_addr))?,
    };
    debug!(%addr, command = ?cli.command, "Running command");
    let importer = connect_tcp(addr, config).map_err(|e| e.to_string())?;
    let output = execute(&importer, &cli.command).map_err(|e| e.to_string())?;
    println!("{output}");
    Ok(())
}

fn to_pretty_json<T: Serialize>(value: &T) -> RpcResult<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn execute(importer: &Importer, command: &Commands) -> RpcResult<String> {
    match command {
        Commands::List => Ok(importer.list_classes()?.join("\n")),
        Commands::Surface { class } => {
            let proxy = importer.import_class(class)?;
            to_pretty_json(proxy.surface())
        }
        Commands::Remove { class } => {
            if importer.remove_class(class)? {
                Ok(format!("Removed class '{class}'"))
            } else {
                Ok(format!("Class '{class}' was not exported"))
            }
        }
    }
}

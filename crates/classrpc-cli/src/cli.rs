//! Clap CLI definitions for classrpc.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  classrpc list                         List classes exported by the origin
  classrpc surface Api                  Print the member surface of a class
  classrpc remove Api                   Unexport a class on the origin
  classrpc --connect 10.0.0.2:7070 list Talk to a specific origin";

/// classrpc: inspect and manage classes exported over a class bridge.
#[derive(Parser, Debug)]
#[command(name = "classrpc", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Origin address; defaults to `listen_addr` from the config.
    #[arg(long, global = true)]
    pub connect: Option<SocketAddr>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// List exported class names.
    List,
    /// Print a class surface as JSON.
    Surface {
        /// Exported class name.
        class: String,
    },
    /// Remove an exported class. Live instances stay usable.
    Remove {
        /// Exported class name.
        class: String,
    },
}

//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Product catalog RPC service with pluggable channel security and call authentication
#[derive(Parser, Debug)]
#[command(name = "rpc-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "RPC_AUTH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RPC_AUTH_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "RPC_AUTH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the catalog server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },

    /// Add a product and print its id
    AddProduct {
        /// Product name
        #[arg(long)]
        name: String,

        /// Product description
        #[arg(long, default_value = "")]
        description: String,

        /// Unit price
        #[arg(long)]
        price: f32,

        /// Server address, overriding `client.address`
        #[arg(long)]
        address: Option<String>,
    },

    /// Fetch a product by id and print it as JSON
    GetProduct {
        /// Product id
        id: String,

        /// Server address, overriding `client.address`
        #[arg(long)]
        address: Option<String>,
    },
}

//! rpc-auth - product catalog RPC service
//!
//! Serves the catalog behind configurable channel security and call
//! authentication, and doubles as a client for it.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use rpc_auth::{
    app::{catalog_client, catalog_server},
    catalog::Product,
    cli::{Cli, Command},
    config::Config,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::AddProduct {
            name,
            description,
            price,
            address,
        }) => {
            if let Some(address) = address {
                config.client.address = address;
            }
            run_add_product(&config, Product::new(name, description, price)).await
        }
        Some(Command::GetProduct { id, address }) => {
            if let Some(address) = address {
                config.client.address = address;
            }
            run_get_product(&config, &id).await
        }
        Some(Command::Serve { port, host }) => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            run_server(config).await
        }
        None => run_server(config).await,
    }
}

async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.bind_addr(),
        mode = config.channel.mode.as_str(),
        "Starting catalog server"
    );

    let server = match catalog_server(&config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to configure server: {e}");
            return ExitCode::FAILURE;
        }
    };

    let bound = match server.bind(&config.server.bind_addr()).await {
        Ok(bound) => bound,
        Err(e) => {
            error!("Failed to bind: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = bound.serve().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

async fn run_add_product(config: &Config, product: Product) -> ExitCode {
    let client = match catalog_client(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to configure client: {e}");
            return ExitCode::FAILURE;
        }
    };

    match client.add_product(&product).await {
        Ok(id) => {
            info!(id = %id, name = %product.name, "Product added");
            println!("{id}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(code = %e.status_code(), "Could not add product: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_get_product(config: &Config, id: &str) -> ExitCode {
    let client = match catalog_client(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to configure client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let product = match client.get_product(id).await {
        Ok(product) => product,
        Err(e) => {
            error!(code = %e.status_code(), "Could not get product: {e}");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&product) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize product: {e}");
            ExitCode::FAILURE
        }
    }
}

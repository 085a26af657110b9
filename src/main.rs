//! Stubserver - CLI Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use stubserver::{StubServer, StubServerConfig};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "stubserver",
    about = "HTTP server that answers requests with the stubs declared in a config file",
    version
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info", global = true)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Config file declaring the stubs
        #[arg(short, long)]
        config: PathBuf,

        /// Port to listen on
        #[arg(short, long, env = "STUBSERVER_PORT", default_value_t = 80)]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
    },

    /// Validate a config file and exit
    Validate {
        /// Config file to check
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print a sample configuration and exit
    PrintConfig,

    /// Print the version number
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Serve { config, port, host } => {
            info!(path = ?config, "Loading configuration");
            let config = StubServerConfig::from_file(&config)
                .with_context(|| format!("Cannot load config file {}", config.display()))?;

            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .with_context(|| format!("Invalid listen address {host}:{port}"))?;
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Cannot bind {addr}"))?;

            StubServer::new(config).run(listener).await?;
            info!("Stubserver stopped successfully");
        }
        Command::Validate { config: path } => {
            let config = StubServerConfig::from_file(&path)
                .with_context(|| format!("Cannot load config file {}", path.display()))?;
            println!(
                "Configuration is valid ({} endpoints defined)",
                config.endpoints.len()
            );
        }
        Command::PrintConfig => {
            print!("{}", include_str!("../demos/stubserver.yaml"));
        }
        Command::Version => {
            println!("Stubserver version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

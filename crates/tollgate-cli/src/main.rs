mod cmd;
mod output;
mod setup;
mod tools;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, trust::TrustSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tollgate",
    about = "Tool-invocation gateway: admission control, consensus judgment and circuit breakers",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./tollgate.yaml; absent file means defaults)
    #[arg(long, global = true, env = "TOLLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway over stdio, one JSON-RPC message per line
    Mcp,

    /// Run the HTTP transport and operator API
    Serve {
        /// Override `server.host`
        #[arg(long)]
        host: Option<String>,

        /// Override `server.port` (0 = OS-assigned)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Inspect and validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Inspect persisted caller trust scores
    Trust {
        #[command(subcommand)]
        subcommand: TrustSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } | Commands::Mcp => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    // stdout carries protocol lines under `mcp`; logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = setup::resolve_config_path(cli.config.as_deref());

    let result = match cli.command {
        Commands::Mcp => cmd::mcp::run(&config_path),
        Commands::Serve { host, port } => cmd::serve::run(&config_path, host, port),
        Commands::Config { subcommand } => cmd::config::run(&config_path, subcommand, cli.json),
        Commands::Trust { subcommand } => cmd::trust::run(&config_path, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

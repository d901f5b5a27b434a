//! Zeus: a multi-tenant gateway for a fleet of AI assistant workers.
//!
//! ## Usage
//!
//! ```bash
//! # Start the gateway on the default port
//! zeus
//!
//! # Subprocess workers instead of containers, custom port
//! zeus --backend subprocess --port 3005
//!
//! # With verbose logging
//! zeus -v
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use zeus_core::{init_logging, BackendKind, GatewayConfig};
use zeus_gateway::Gateway;

/// Zeus gateway: orchestrates AI assistant workers behind one stream.
#[derive(Parser, Debug)]
#[command(name = "zeus")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Client-facing port (WebSocket + auxiliary HTTP)
    #[arg(long)]
    port: Option<u16>,

    /// Host to bind
    #[arg(long)]
    host: Option<String>,

    /// Workspace root shared with workers
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Shared prompts directory workers read
    #[arg(long)]
    prompts_dir: Option<PathBuf>,

    /// Worker launch backend
    #[arg(long, value_enum, default_value_t = BackendArg::Container)]
    backend: BackendArg,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Pass debug env to launched workers
    #[arg(long)]
    debug: bool,

    /// Directory for log files (defaults to ~/.zeus/logs/)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum BackendArg {
    Container,
    Subprocess,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Container => BackendKind::Container,
            BackendArg::Subprocess => BackendKind::Subprocess,
        }
    }
}

fn build_config(cli: &Cli) -> GatewayConfig {
    let mut config = GatewayConfig {
        backend: cli.backend.into(),
        debug: cli.debug,
        ..GatewayConfig::default()
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(workspace) = &cli.workspace {
        config.workspace = workspace.clone();
    }
    if let Some(prompts_dir) = &cli.prompts_dir {
        config.prompts_dir = prompts_dir.clone();
    }
    config
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match init_logging(cli.log_dir.clone(), cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::from(1);
        }
    };

    let config = build_config(&cli);
    info!(
        port = config.port,
        backend = %config.backend,
        "starting zeus gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("gateway wiring failed: {e}");
            eprintln!("Error: {e}");
            return ExitCode::from(1);
        }
    };

    match gateway.run().await {
        Ok(()) => {
            info!("gateway exited normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("gateway error: {e}");
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

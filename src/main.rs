//! Fiberlink — microservice host for a fiber tunnel endpoint.
//!
//! Hosts the service factory behind a JSON-RPC control channel and exposes
//! the in-memory fiber demultiplexer through a TCP gateway, so that every
//! virtual port a created service binds is reachable from outside.
//!
//! Usage:
//!   fiberlink                                   # Defaults, process service disabled
//!   fiberlink --config fiberlink.json           # Load configuration
//!   fiberlink --enable-process --path /bin/cat  # Offer the process relay
//!   fiberlink --control-port 0 --gateway-port 0 # OS-assigned ports

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fiber_server::{AdminHandler, Config, ServiceFactory, ServiceManager, register_process_service};
use fiber_transport::{ControlServer, Gateway, MemoryDemux};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fiberlink", about = "Fiberlink — microservices over a fiber tunnel")]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Control channel port (0 for OS-assigned)
    #[arg(long)]
    control_port: Option<u16>,

    /// TCP gateway port (0 for OS-assigned)
    #[arg(long)]
    gateway_port: Option<u16>,

    /// Hostname to bind both listeners to
    #[arg(long)]
    hostname: Option<String>,

    /// Offer the process relay service
    #[arg(long)]
    enable_process: bool,

    /// Binary spawned by the process relay
    #[arg(long)]
    path: Option<String>,

    /// Arguments for the process relay binary
    #[arg(long, allow_hyphen_values = true)]
    args: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file (defaults to ~/.fiberlink/logs/fiberlink.log if no path given)
    #[arg(long, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,
}

impl Cli {
    /// Fold command-line overrides into the loaded configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.control_port {
            config.control.port = port;
        }
        if let Some(port) = self.gateway_port {
            config.gateway.port = port;
        }
        if let Some(ref hostname) = self.hostname {
            config.control.hostname = hostname.clone();
            config.gateway.hostname = hostname.clone();
        }

        let process = &mut config.services.process;
        if self.enable_process {
            process.enabled = true;
        }
        if let Some(ref path) = self.path {
            process.path = path.clone();
        }
        if let Some(ref args) = self.args {
            process.args = args.clone();
        }
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if let Some(ref log_file_arg) = cli.log_file {
        let log_path = if log_file_arg == "DEFAULT" {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
            PathBuf::from(home).join(".fiberlink/logs/fiberlink.log")
        } else {
            PathBuf::from(log_file_arg)
        };

        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let mut config = match cli.config {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };
    cli.apply(&mut config);

    // ── Service stack ────────────────────────────────────────────────────
    let demux = Arc::new(MemoryDemux::new());

    let mut factory = ServiceFactory::new(demux.clone());
    let process_offered = register_process_service(&mut factory, &config.services.process);
    let manager = Arc::new(ServiceManager::new(Arc::new(factory)));
    let handler = Arc::new(AdminHandler::new(manager.clone()));

    // ── Listeners ────────────────────────────────────────────────────────
    let mut control = ControlServer::start(config.control_config(cli.verbose), handler)
        .await
        .context("Failed to start control channel")?;
    let mut gateway = Gateway::start(config.gateway_config(), demux.clone())
        .await
        .context("Failed to start fiber gateway")?;

    println!();
    println!("  Fiberlink {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  Control:    ws://{}:{}/ws", config.control.hostname, control.port());
    println!("  Gateway:    tcp://{}:{}", config.gateway.hostname, gateway.port());
    if process_offered {
        let process = &config.services.process;
        println!("  Process:    {} {}", process.path, process.args);
    } else {
        println!("  Process:    disabled");
    }
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!();
    println!("  Shutting down...");
    control.stop().await;
    gateway.stop().await;
    manager.stop_all().await;
    demux.shutdown();
    info!("Fiberlink stopped");
    println!("  Server stopped.");

    Ok(())
}

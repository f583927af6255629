use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tadhkir::config::{Config, DEFAULT_CONFIG_PATH};
use tadhkir::fault::{fault_channel, install_panic_hook, spawn_fault_supervisor};
use tadhkir::gateway::{TelegramConfig, TelegramConnector};
use tadhkir::server::{self, AppState};
use tadhkir::{ControllerSettings, LifecycleController, SubscriberRegistry};

#[derive(Parser)]
#[command(name = "tadhkir")]
#[command(about = "Periodic reminder bot with a guarded start/stop lifecycle", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Host to bind to (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Bot token (overrides config)
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)
        .await
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let token = match cli.token.or_else(|| config.gateway.token.clone()) {
        Some(token) if !token.trim().is_empty() => token,
        _ => bail!("no bot token configured: set TELEGRAM_BOT_TOKEN or gateway.token"),
    };

    let connector = Arc::new(TelegramConnector::new(TelegramConfig::new(token)));
    let controller = LifecycleController::new(
        connector,
        SubscriberRegistry::new(),
        ControllerSettings::from_config(&config),
    );

    let (faults, fault_rx) = fault_channel();
    install_panic_hook(faults);
    let supervisor = spawn_fault_supervisor(controller.clone(), fault_rx);

    let app = server::build_app(
        AppState {
            controller: controller.clone(),
        },
        config.server.request_timeout_seconds,
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "Control server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    controller.shutdown().await;
    supervisor.abort();
    info!("Shutdown complete");

    served.context("control server failed")
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

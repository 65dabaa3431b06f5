//! # podium
//!
//! Relay server binary: loads settings, wires logging, metrics and templates
//! into the server and runs until ctrl-c or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use podium_core::logging::{LogFormat, init_subscriber};
use podium_server::config::ServerConfig;
use podium_server::pages::Pages;
use podium_server::server::PodiumServer;
use podium_server::shutdown::wait_for_signal;
use podium_settings::PodiumSettings;

/// Presenter/audience `WebSocket` relay.
#[derive(Parser, Debug)]
#[command(name = "podium", about = "Presenter/audience WebSocket relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// JSON settings file layered over the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// `.env` file to load instead of searching the working directory.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut PodiumSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let dotenv =
        podium_settings::load_dotenv(cli.env_file.as_deref()).context("Failed to read .env")?;
    let mut settings =
        podium_settings::load_settings(cli.config.as_deref()).context("Failed to load settings")?;
    cli.apply(&mut settings);

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);
    if let Some(path) = dotenv {
        tracing::info!(path = %path.display(), "loaded .env");
    }

    let metrics = podium_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let templates_dir = &settings.paths.templates_dir;
    let pages = Pages::load(templates_dir, settings.domain_name.clone())
        .with_context(|| format!("Failed to load templates from {}", templates_dir.display()))?;

    if !settings.paths.static_dir.is_dir() {
        tracing::warn!(
            dir = %settings.paths.static_dir.display(),
            "static directory not found, /static will return 404"
        );
    }

    let config = ServerConfig::from_settings(&settings);
    let server = PodiumServer::new(config, pages).with_metrics(metrics);
    let addr = server.listen().await.context("Failed to start server")?;

    tracing::info!(
        domain = %settings.domain_name,
        "Podium listening on http://{addr} (presenter at /presenter_ui)"
    );

    wait_for_signal().await;
    tracing::info!("Shutting down...");

    if !server.shutdown_gracefully(None).await {
        tracing::warn!("some tasks did not finish before the shutdown timeout");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

//! # galley
//!
//! Kitchen dashboard notification server: loads settings, starts the
//! notification service, and serves the dashboard socket endpoint.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use galley_server::{GalleyServer, NotificationService};
use galley_settings::{GalleySettings, load_settings_from_path, settings_path};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Galley notification server.
#[derive(Parser, Debug)]
#[command(name = "galley", about = "Reliable real-time kitchen dashboard notifications")]
struct Cli {
    /// Settings file (defaults to `$GALLEY_SETTINGS` or `~/.galley/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Disable the Prometheus `/metrics` endpoint.
    #[arg(long)]
    no_metrics: bool,
}

impl Cli {
    fn apply(&self, settings: &mut GalleySettings) {
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
    let args = Cli::parse();

    let path = args.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);

    let _ = galley_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    tracing::info!(version = %settings.version, settings_path = %path.display(), "starting galley");

    let metrics = if args.no_metrics {
        None
    } else {
        match galley_server::metrics::install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
                None
            }
        }
    };

    let service = NotificationService::new(settings.realtime.clone());
    service.start();

    let server = GalleyServer::new(settings.server.clone(), service.clone(), metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("galley listening on ws://{addr}/ws/kitchen/{{restaurant_id}}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    service.shutdown().await;
    let timeout = Duration::from_millis(settings.server.shutdown_timeout_ms);
    let _ = server.shutdown().graceful_shutdown(vec![handle], timeout).await;

    tracing::info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["galley"]);
        assert!(cli.config.is_none());
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(!cli.no_metrics);
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from(["galley", "--host", "0.0.0.0", "--port", "9000", "--no-metrics"]);
        let mut settings = GalleySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert!(cli.no_metrics);
    }

    #[test]
    fn cli_without_overrides_keeps_settings() {
        let cli = Cli::parse_from(["galley", "--config", "/tmp/galley.json"]);
        let mut settings = GalleySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 8080);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/galley.json")));
    }
}

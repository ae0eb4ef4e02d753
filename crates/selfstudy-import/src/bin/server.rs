//! Import server binary
//!
//! Run with: cargo run -p selfstudy-import --bin selfstudy-import-server -- --config import.toml

use clap::Parser;
use selfstudy_import::{config::ImportConfig, server::ImportServer};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Self-study document import and standards mapping service
#[derive(Debug, Parser)]
#[command(name = "selfstudy-import-server", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "SELFSTUDY_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(long, env = "SELFSTUDY_HOST")]
    host: Option<String>,

    /// Listen port
    #[arg(short, long, env = "SELFSTUDY_PORT")]
    port: Option<u16>,

    /// SQLite database file
    #[arg(long, env = "SELFSTUDY_DATABASE")]
    database: Option<PathBuf>,

    /// Send documents to this external classifier endpoint
    #[arg(long, env = "SELFSTUDY_CLASSIFIER_ENDPOINT")]
    classifier_endpoint: Option<String>,

    /// Public URL the classifier posts results to
    #[arg(long, env = "SELFSTUDY_CALLBACK_URL")]
    callback_url: Option<String>,

    /// Shared secret expected on inbound callbacks
    #[arg(long, env = "SELFSTUDY_CALLBACK_SECRET", hide_env_values = true)]
    callback_secret: Option<String>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ImportConfig> {
        let mut config = match &self.config {
            Some(path) => ImportConfig::load(path)?,
            None => ImportConfig::default(),
        };

        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(database) = self.database {
            config.storage.database_path = database;
        }
        if let Some(endpoint) = self.classifier_endpoint {
            config.classifier.endpoint = endpoint;
            config.classifier.enabled = true;
        }
        if let Some(callback_url) = self.callback_url {
            config.classifier.callback_url = callback_url;
        }
        if let Some(secret) = self.callback_secret {
            config.classifier.callback_secret = Some(secret);
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "selfstudy_import=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Args::parse().into_config()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Database: {}", config.storage.database_path.display());
    tracing::info!("  - Workers: {}", config.processing.worker_count());
    tracing::info!(
        "  - Thresholds: local {}, external {}",
        config.mapping.local_threshold,
        config.mapping.external_threshold
    );
    if config.classifier.enabled {
        tracing::info!("  - Classifier: {}", config.classifier.endpoint);
    } else {
        tracing::info!("  - Classifier: disabled (local pattern mapping)");
    }

    let server = ImportServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}

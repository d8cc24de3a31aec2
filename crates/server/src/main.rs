//! dokhub server binary.

use anyhow::{Context, Result};
use clap::Parser;
use dokhub_core::config::{AppConfig, PrivateKeyConfig, SigningConfig};
use dokhub_server::bootstrap::ensure_admin_token;
use dokhub_server::handlers::expire_overdue_shares;
use dokhub_server::{AppState, create_router};
use dokhub_signer::ShareSigner;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// dokhub - document hub for students and organizations
#[derive(Parser, Debug)]
#[command(name = "dokhubd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "DOKHUB_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("dokhub v{}", env!("CARGO_PKG_VERSION"));

    // The file is optional; DOKHUB_* env vars can provide or override everything.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("DOKHUB_") && key != "DOKHUB_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: dokhubd --config /path/to/config.toml\n  \
             2. Environment variables: DOKHUB_SERVER__BIND=0.0.0.0:8080 \
             DOKHUB_ADMIN__TOKEN_HASH=sha256:YOUR_TOKEN_HASH_HERE dokhubd\n\n\
             Set DOKHUB_CONFIG to change the default config file path."
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("DOKHUB_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    dokhub_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = dokhub_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend initialized");

    let metadata = dokhub_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    ensure_admin_token(metadata.as_ref(), &config.admin).await?;

    let signer = if let Some(signing_config) = &config.signing {
        Some(load_signer(signing_config).await?)
    } else {
        tracing::warn!("No signing key configured, share links are disabled");
        None
    };

    let state = AppState::new(config.clone(), storage, metadata, signer);

    if let Some(interval) = config.sharing.cleanup_interval() {
        spawn_share_cleanup(state.clone(), interval);
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Share cleanup task spawned"
        );
    } else {
        tracing::info!("Share cleanup task disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    // ConnectInfo feeds client IPs into share and audit records.
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Periodically expire overdue share links.
fn spawn_share_cleanup(state: AppState, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = expire_overdue_shares(&state).await {
                tracing::error!(error = %e, "Share cleanup failed");
            }
        }
    })
}

/// Load the share signer from configuration.
async fn load_signer(config: &SigningConfig) -> Result<ShareSigner> {
    match &config.private_key {
        PrivateKeyConfig::File { path } => {
            let key_data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read key file: {}", path.display()))?;
            let signer = ShareSigner::from_secret_key(key_data.trim())
                .context("failed to parse signing key")?;
            tracing::info!("Loaded signing key: {}", signer.key_name());
            Ok(signer)
        }
        PrivateKeyConfig::Env { var } => {
            let key_data = std::env::var(var)
                .with_context(|| format!("signing key env var not set: {var}"))?;
            let signer = ShareSigner::from_secret_key(key_data.trim())
                .context("failed to parse signing key")?;
            tracing::info!("Loaded signing key from env: {}", signer.key_name());
            Ok(signer)
        }
        PrivateKeyConfig::Generate => {
            tracing::warn!("Generating ephemeral signing key, share links will not survive a restart");
            let signer = ShareSigner::generate(config.key_name.clone());
            tracing::info!("Generated signing key: {}", signer.key_name());
            tracing::info!("Public key: {}", signer.public_key_string());
            Ok(signer)
        }
        PrivateKeyConfig::Value { key } => {
            tracing::warn!("Using inline signing key (not recommended for production)");
            let signer = ShareSigner::from_secret_key(key.trim())
                .context("failed to parse signing key")?;
            tracing::info!("Loaded signing key: {}", signer.key_name());
            Ok(signer)
        }
    }
}

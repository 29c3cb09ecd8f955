//! Relay server - Entry point.

use anyhow::{Context, Result};
use message_store::{spawn_sweeper, ExpirySweeper, MessageStore, SystemClock};
use relay_auth::{AccessKeys, CredentialStore, TokenService};
use relay_server::{
    api::{create_router_with_rate_limit, AppState, RateLimitState},
    config::{Config, LogFormat},
    Relay,
};
use secrecy::SecretString;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vault::Snapshots;

const IDENTITIES_FILE: &str = "identities.vault";
const MESSAGES_FILE: &str = "messages.vault";

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    if let Err(e) = run(config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    info!("Starting message relay");

    // Initialize storage
    let (identity_snapshots, message_snapshots) = match config.storage_key()? {
        Some(key) => {
            info!("Persisting sealed snapshots under {:?}", config.storage.dir);
            (
                Snapshots::sealed(config.storage.dir.join(IDENTITIES_FILE), key.clone()),
                Snapshots::sealed(config.storage.dir.join(MESSAGES_FILE), key),
            )
        }
        None => {
            info!("Persistence disabled, using in-memory storage");
            (Snapshots::memory(), Snapshots::memory())
        }
    };

    let credentials = CredentialStore::open(identity_snapshots, config.auth.hashing)
        .await
        .context("Failed to open credential store")?;

    let messages = MessageStore::open(
        message_snapshots,
        config.payload_policy()?,
        config.store_limits(),
        Arc::new(SystemClock),
    )
    .await
    .context("Failed to open message store")?;
    let messages = Arc::new(messages);

    // Secrets
    let token_secret = config
        .auth
        .token_secret
        .clone()
        .unwrap_or_else(|| SecretString::new(String::new()));
    let tokens = TokenService::new(token_secret, config.token_policy()?)
        .context("Failed to initialize token service")?;

    let access_keys = AccessKeys::load(
        &config.inline_access_keys(),
        config.access.keys_file.as_deref(),
    )
    .await
    .context("Failed to load access keys")?;
    if access_keys.is_empty() {
        anyhow::bail!("No access keys configured");
    }
    info!("Accepting {} access keys", access_keys.len());

    let relay = Arc::new(Relay::new(
        Arc::new(credentials),
        tokens,
        access_keys,
        messages.clone(),
    ));

    // Start the expiry sweeper
    let sweeper = Arc::new(ExpirySweeper::new(messages, config.sweeper.clone()));
    let (sweeper_task, sweeper_handle) = spawn_sweeper(sweeper.clone());

    // Create router with rate limiting
    let state = AppState::new(relay, sweeper);
    let rate_limit = RateLimitState::new(config.rate_limit.global_per_minute);
    let app = create_router_with_rate_limit(state, rate_limit);

    // Bind to address
    let addr = SocketAddr::new(
        config
            .server
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address {:?}", config.server.listen_addr))?,
        config.server.port,
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on {}", addr);

    // Run server until ctrl-c
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper_handle.shutdown();
    if let Err(e) = sweeper_task.await {
        error!("Expiry sweeper task failed: {}", e);
    }

    served.context("Server error")?;
    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

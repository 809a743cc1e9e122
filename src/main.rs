use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pamoja_chat::{
    api::{rate_limiter::RateLimiter, routes},
    config::Config,
    crypto::HistoryCipher,
    orchestrator::{ChatOrchestrator, TurnSettings},
    services::{OpenAiCompatibleClient, WhatsAppClient},
    storage::{self, repository::SeaOrmConversationRepository},
};

#[derive(Parser, Debug)]
#[command(name = "pamoja-chat", version, about = "Pamoja chat service")]
struct Cli {
    /// Config file to load instead of ~/.pamoja/config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured HTTP port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Load config
    let mut config = Config::load_from(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(port) = cli.port {
        config.server_port = port;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("pamoja_chat={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(config);

    // Initialize database
    let db_conn = storage::init_db(&config.database_url).await?;
    let repository = Arc::new(SeaOrmConversationRepository::new(db_conn));

    // Key is derived once and held for the life of the process
    let cipher = Arc::new(HistoryCipher::new(config.encryption_secret.as_deref()));
    if !cipher.is_configured() {
        tracing::warn!("encryption_secret is not set; history will be stored as plaintext fallback");
    }

    let completion = Arc::new(OpenAiCompatibleClient::from_config(&config));
    if config.completion_api_key.is_none() {
        tracing::warn!("completion_api_key is not set; chat turns will fail until it is configured");
    }

    let whatsapp = Arc::new(WhatsAppClient::from_config(&config));
    if !whatsapp.is_configured() {
        tracing::info!("WhatsApp credentials not set; webhook replies will not be delivered");
    }

    let orchestrator = Arc::new(ChatOrchestrator::new(
        repository.clone(),
        cipher,
        completion.clone(),
        TurnSettings::from(config.as_ref()),
    ));

    let rate_limiter = RateLimiter::new(config.rate_limit_per_minute);
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup_expired();
        }
    });

    // Create application state
    let state = routes::AppState {
        config: config.clone(),
        repo: repository,
        orchestrator,
        whatsapp,
        rate_limiter,
    };

    let app = routes::create_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Completion model: {}", completion.model());
    tracing::info!("OpenAPI document: http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

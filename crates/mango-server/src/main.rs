use std::net::SocketAddr;
use std::sync::Arc;

use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use mango_api::auth::{AppState, AppStateInner};
use mango_api::completions::{CompletionProvider, OpenAiClient};
use mango_db::Database;
use mango_gateway::Dispatcher;
use mango_types::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mango=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Database::open(&config.db_path)?;
    tokio::fs::create_dir_all(&config.upload_dir).await?;
    info!("Picture uploads stored in {}", config.upload_dir.display());

    let completions = OpenAiClient::from_config(&config.openai)
        .map(|client| Arc::new(client) as Arc<dyn CompletionProvider>);
    match &completions {
        Some(_) => info!("Prompt proxy enabled (engine {})", config.openai.engine),
        None => warn!("OPENAI_API_KEY not set, /prompt routes will answer 503"),
    }
    if config.dev_endpoints {
        warn!("Development endpoints are enabled; /drop_all is reachable by superusers");
    }

    let state: AppState = Arc::new(AppStateInner::new(
        &config,
        db,
        Dispatcher::new(),
        completions,
    ));

    let app = mango_api::router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Mango server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

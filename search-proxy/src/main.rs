use regagent_search_proxy::config::Config;
use regagent_search_proxy::embeddings::CohereQueryEmbedder;
use regagent_search_proxy::qdrant::QdrantIndexService;
use regagent_search_proxy::routes::router;
use regagent_search_proxy::state::ProxyState;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "regagent_search_proxy=info,tower_http=info".into()),
        )
        .with(fmt::layer().json())
        .init();

    tracing::info!("Starting search proxy...");

    let config = Arc::new(Config::load().expect("Failed to load configuration"));
    tracing::debug!(?config, "Loaded configuration");

    let index = Arc::new(QdrantIndexService::new(&config)?);
    let embedder = Arc::new(CohereQueryEmbedder::new(config.clone())?);

    let state = ProxyState {
        config: config.clone(),
        index,
        embedder,
    };

    let app = router(state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

use axum::{Router, extract::DefaultBodyLimit, routing::get};
use deadpool_diesel::postgres::{Manager as DeadpoolManager, Runtime as DeadpoolRuntime};
use deadpool_diesel::Pool as DeadpoolPool;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use anyhow::Result;
use regagent_backend::PgPool;
use regagent_backend::agents::AgentRegistry;
use regagent_backend::auth::TokenVerifier;
use regagent_backend::clients::{aps::ApsClient, drs::DrsClient, ecfr::EcfrClient};
use regagent_backend::config::Config;
use regagent_backend::llm::anthropic::build_anthropic_client;
use regagent_backend::llm::embeddings::build_embedding_client;
use regagent_backend::logging::init_subscriber;
use regagent_backend::pdf::PdfTextExtractor;
use regagent_backend::routes::chat::chat_routes;
use regagent_backend::routes::documents::document_routes;
use regagent_backend::routes::health::health_check;
use regagent_backend::services::cache::{BlobDocumentCache, KeyLocks};
use regagent_backend::services::conversation::{
    ConversationStore, InMemoryConversationStore, PgConversationStore,
};
use regagent_backend::services::indexer::IndexScheduler;
use regagent_backend::services::orchestrator::Orchestrator;
use regagent_backend::services::quota::InMemoryQuotaTracker;
use regagent_backend::services::search_proxy::HttpSearchProxy;
use regagent_backend::state::{AppState, ConversationSessions};
use regagent_backend::text_processing::chunking::ChunkConfig;
use regagent_backend::tools::{
    ToolRegistry,
    aps::{FetchApsDocumentTool, SearchApsTool},
    cfr::FetchCfrSectionTool,
    drs::{FetchDrsDocumentTool, SearchDrsTool},
    personal_docs::{
        DeleteMyDocumentTool, FetchPersonalDocumentTool, ListMyDocumentsTool,
        SearchPersonalDocumentTool,
    },
    search_indexed::SearchIndexedContentTool,
};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_subscriber();

    tracing::info!("Starting regagent backend server...");

    let config = Arc::new(Config::load().expect("Failed to load configuration"));
    tracing::debug!(?config, "Loaded configuration");

    // Conversation store: Postgres when configured, in-memory otherwise.
    let store: Arc<dyn ConversationStore> = match &config.database_url {
        Some(db_url) => {
            tracing::info!("Connecting to database...");
            let manager = DeadpoolManager::new(db_url, DeadpoolRuntime::Tokio1);
            let pool: PgPool = DeadpoolPool::builder(manager)
                .runtime(DeadpoolRuntime::Tokio1)
                .build()
                .expect("Failed to create DB pool");
            run_migrations(&pool).await?;
            Arc::new(PgConversationStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory conversation store");
            Arc::new(InMemoryConversationStore::new())
        }
    };

    if config.jwt_secret.is_none() {
        tracing::warn!("JWT_SECRET not set - authentication will not work!");
    }
    let token_verifier = config
        .jwt_secret
        .as_deref()
        .map(|secret| Arc::new(TokenVerifier::new(secret)));

    let ai_client = Arc::new(build_anthropic_client(config.clone())?);
    let embedding_client = Arc::new(build_embedding_client(config.clone())?);
    let search_proxy = Arc::new(HttpSearchProxy::new(
        &config.search_proxy_url,
        config.search_proxy_service_token.clone(),
    )?);
    let cache = Arc::new(BlobDocumentCache::new(config.cache_root.clone()));
    let pdf = Arc::new(PdfTextExtractor);
    let fetch_locks = Arc::new(KeyLocks::new());

    let indexer = IndexScheduler::new(
        cache.clone(),
        embedding_client.clone(),
        search_proxy.clone(),
        ChunkConfig::default(),
        config.index_on_second_hit,
    );

    let ecfr = Arc::new(EcfrClient::new(&config)?);
    let drs = Arc::new(DrsClient::new(&config, pdf.clone())?);
    let aps = Arc::new(ApsClient::new(&config)?);

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(SearchIndexedContentTool::new(search_proxy.clone())));
    tools.register(Arc::new(FetchCfrSectionTool::new(
        ecfr,
        cache.clone(),
        indexer.clone(),
        fetch_locks.clone(),
        config.cache_enabled,
        config.index_on_second_hit,
    )));
    tools.register(Arc::new(SearchDrsTool::new(drs.clone())));
    tools.register(Arc::new(FetchDrsDocumentTool::new(
        drs,
        cache.clone(),
        indexer.clone(),
        fetch_locks.clone(),
        config.cache_enabled,
        config.index_on_second_hit,
    )));
    tools.register(Arc::new(SearchApsTool::new(aps.clone())));
    tools.register(Arc::new(FetchApsDocumentTool::new(
        aps,
        cache.clone(),
        indexer.clone(),
        fetch_locks.clone(),
        config.cache_enabled,
        config.index_on_second_hit,
    )));
    tools.register(Arc::new(ListMyDocumentsTool::new(search_proxy.clone())));
    tools.register(Arc::new(FetchPersonalDocumentTool::new(search_proxy.clone())));
    tools.register(Arc::new(SearchPersonalDocumentTool::new(
        search_proxy.clone(),
        embedding_client.clone(),
    )));
    tools.register(Arc::new(DeleteMyDocumentTool::new(search_proxy.clone())));
    let tools = Arc::new(tools);

    let orchestrator = Orchestrator::new(store.clone(), ai_client, tools, config.clone());

    let app_state = AppState {
        config: config.clone(),
        agents: Arc::new(AgentRegistry::new(&config)),
        orchestrator,
        store,
        cache,
        indexer,
        embedding_client,
        search_proxy,
        quota: Arc::new(InMemoryQuotaTracker::new(config.daily_request_limit)),
        pdf,
        token_verifier,
        sessions: Arc::new(ConversationSessions::new()),
        fetch_locks,
    };

    let upload_limit = config.personal_doc_max_size_mb * 1024 * 1024 + 1024 * 1024;
    let app = Router::new()
        .route("/api/health", get(health_check))
        .nest("/api/chat", chat_routes())
        .nest("/api/documents", document_routes())
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(app_state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_migrations(pool: &PgPool) -> Result<()> {
    tracing::info!("Running database migrations...");
    let conn = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get connection for migration: {e}"))?;
    conn.interact(|conn| {
        conn.run_pending_migrations(MIGRATIONS)
            .map(|versions| tracing::info!("Applied migrations: {versions:?}"))
            .map_err(|e| anyhow::anyhow!("Migration error: {e:?}"))
    })
    .await
    .map_err(|e| anyhow::anyhow!("Migration interact task failed: {e}"))??;
    Ok(())
}

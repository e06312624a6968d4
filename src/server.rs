use std::sync::Arc;
use std::time::Duration;

use axum::{Router, extract::DefaultBodyLimit};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::analytics;
use crate::api;
use crate::chat::{ChatStore, InMemoryChatStore};
use crate::config::AppConfig;
use crate::llm::{ChatCompletionsDriver, LlmDriver, LlmSettings, Orchestrator};
use crate::oauth::{ScopeResolver, SpecCache, TokenBroker};
use crate::tools::{ToolContext, ToolHistory, ToolRegistry};

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Outbound token exchange with the identity provider.
    pub broker: Arc<TokenBroker>,
    pub registry: Arc<ToolRegistry>,
    /// LLM tool loop.
    pub orchestrator: Arc<Orchestrator>,
    pub chats: Arc<dyn ChatStore>,
}

impl AppState {
    /// Wire every component from configuration, talking to the configured LLM.
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let settings = LlmSettings::from(&config.llm);
        info!(
            name: "llm.config.loaded",
            base_url = %settings.base_url,
            model = %settings.model,
            provider = ?settings.provider,
            "LLM configuration loaded"
        );
        Self::with_driver(config, Arc::new(ChatCompletionsDriver::new(settings)))
    }

    /// Wire every component around an explicit LLM driver.
    pub fn with_driver(config: Arc<AppConfig>, driver: Arc<dyn LlmDriver>) -> Self {
        if !config.broker.is_configured() {
            tracing::warn!("Token broker credentials missing; every provider will report not connected");
        }

        let analytics = analytics::from_config(&config.analytics);
        let spec_cache = Arc::new(SpecCache::new(Duration::from_secs(
            config.caches.spec_ttl_secs,
        )));
        let resolver = Arc::new(ScopeResolver::new(spec_cache));
        let broker = Arc::new(TokenBroker::new(
            config.broker.clone(),
            resolver,
            analytics,
        ));

        let ctx = Arc::new(ToolContext::new(
            Arc::clone(&broker),
            config.providers.clone(),
        ));
        let history = Arc::new(ToolHistory::new(
            Duration::from_secs(config.caches.history_ttl_secs),
            config.caches.history_per_user,
        ));
        let registry = Arc::new(ToolRegistry::standard(ctx, history));

        for tool in registry.get_all_tools() {
            tracing::debug!(name: "tool.registered", tool = %tool.id, "Tool registered");
        }

        let orchestrator = Arc::new(Orchestrator::with_driver(driver, Arc::clone(&registry)));

        Self {
            config,
            broker,
            registry,
            orchestrator,
            chats: Arc::new(InMemoryChatStore::new()),
        }
    }
}

/// The full HTTP application.
pub fn router(state: AppState) -> Router {
    api::routes(state.clone())
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let state = AppState::from_config(Arc::clone(&config));
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

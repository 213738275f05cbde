//! Core server implementation

use crate::{
    config::ServerConfig,
    error::{ServerError, ServerResult},
    handlers,
    plugins::bundled_loader,
    websocket::websocket_handler,
};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use skein_mcp::builtin::register_builtins;
use skein_mcp::plugin::PluginLoader;
use skein_mcp::registry::CapabilityRegistry;
use skein_mcp::router::McpRouter;

/// Main server state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<CapabilityRegistry>,
    pub router: Arc<McpRouter>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    /// Register built-ins and start the configured plugins
    pub async fn build(config: ServerConfig, loader: Arc<dyn PluginLoader>) -> ServerResult<Self> {
        config.validate()?;
        let registry = Arc::new(CapabilityRegistry::with_loader(loader));
        register_builtins(&registry, &config.mcp.builtins, config.mcp.server_info())?;

        let results = registry.plugins().initialize(config.mcp.plugins.clone()).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(failed, "some plugins failed to load; continuing without them");
        }

        let router = McpRouter::new(Arc::clone(&registry)).with_server_info(config.mcp.server_info());
        Ok(Self {
            config: Arc::new(config),
            registry,
            router: Arc::new(router),
            started_at: Utc::now(),
        })
    }
}

/// Build the router with all routes and middleware
pub fn create_router(state: ServerState) -> Router {
    let limits = &state.config.limits;
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health_check))
        // MCP over HTTP
        .route("/mcp", post(handlers::mcp::handle_rpc))
        // Plugin management
        .route("/plugins", get(handlers::plugins::list_plugins))
        .route("/plugins/:name", get(handlers::plugins::get_plugin))
        .route("/plugins/:name/reload", post(handlers::plugins::reload_plugin))
        .route("/plugins/:name/enable", post(handlers::plugins::enable_plugin))
        .route("/plugins/:name/disable", post(handlers::plugins::disable_plugin))
        // WebSocket endpoint for MCP
        .route("/ws", get(websocket_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(limits.max_body_size))
        .layer(TimeoutLayer::new(Duration::from_secs(limits.request_timeout)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Skein HTTP/WebSocket server
pub struct SkeinServer {
    state: ServerState,
}

impl SkeinServer {
    /// Create a server with the bundled plugins available
    pub async fn new(config: ServerConfig) -> ServerResult<Self> {
        Self::with_loader(config, Arc::new(bundled_loader())).await
    }

    pub async fn with_loader(config: ServerConfig, loader: Arc<dyn PluginLoader>) -> ServerResult<Self> {
        let state = ServerState::build(config, loader).await?;
        Ok(Self { state })
    }

    /// Serve until `shutdown` is cancelled, then unload every plugin
    pub async fn start(self, shutdown: CancellationToken) -> ServerResult<()> {
        let addr = self.state.config.bind;
        let app = create_router(self.state.clone());

        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "Skein server listening");

        let signal = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)))?;

        self.shutdown().await;
        Ok(())
    }

    /// Unload plugins
    pub async fn shutdown(&self) {
        info!("Shutting down Skein server");
        self.state.registry.plugins().shutdown().await;
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Get server state
    pub fn state(&self) -> &ServerState {
        &self.state
    }
}

/// Run server until Ctrl-C
pub async fn run_server(server: SkeinServer) -> ServerResult<()> {
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => {
                warn!(error = %e, "failed to listen for shutdown signal");
                return;
            }
        }
        trigger.cancel();
    });

    server.start(shutdown).await
}

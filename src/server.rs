use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::CacheAside;
use crate::config::Config;
use crate::error::{StoreError, UpstreamError};
use crate::handlers::{chat, health_check, images, AppState, SharedState};
use crate::middleware::{logging_middleware, rate_limit_middleware};
use crate::rate_limiter::RateLimiter;
use crate::store::{MemoryStore, RedisStore, TtlStore};
use crate::upstream::OpenAiClient;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("upstream client: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Builds the router. Every API route (`/chat`, `/images`) passes through
/// the rate limiter before its handler. `/health` is deliberately exempt so
/// health checkers neither consume a client's request budget nor get
/// rejected while that client is throttled.
pub fn create_app(state: SharedState) -> Router {
    let api = Router::new()
        .route("/chat", post(chat))
        .route("/images", post(images))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .merge(api)
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self, StartupError> {
        let store: Arc<dyn TtlStore> = if config.uses_redis() {
            let store = RedisStore::connect(&config.redis_url).await?;
            store.ping().await?;
            tracing::info!("Connected to Redis store");
            Arc::new(store)
        } else {
            tracing::warn!("REDIS_URL not set, running with the in-process store");
            let store = Arc::new(MemoryStore::new());
            store.spawn_sweeper(config.cleanup_interval());
            store
        };

        if config.api_key().is_none() {
            tracing::warn!("OPENAI_API_KEY not set, /chat and /images will answer 500");
        }

        let upstream = OpenAiClient::new(
            config.upstream_base_url.clone(),
            config.api_key().map(str::to_string),
            config.completion_model.clone(),
            config.upstream_timeout(),
            config.retry_policy(),
        )?;

        let state = Arc::new(AppState::new(
            store.clone(),
            Arc::new(upstream),
            RateLimiter::new(store.clone(), config.rate_limit_policy()),
            CacheAside::new(store, config.cache_policy()),
            config.client_ip_header.clone(),
        ));

        Ok(Self {
            app: create_app(state),
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> Result<(), StartupError> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr)
            .await
            .map_err(|source| StartupError::Bind {
                addr: self.bind_addr,
                source,
            })?;

        tracing::info!("Gateway listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");

        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}

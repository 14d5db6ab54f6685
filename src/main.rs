use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_credor_core::config::Config;
use rust_credor_core::handlers::{self, AppState};

/// Entry point for the validation sidecar.
///
/// Initializes tracing, loads configuration, builds the shared state
/// (store client and duplicate-check cache) and serves the document and
/// creditor endpoints used by the admin front-end.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_credor_core=debug,credor_sidecar=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let app_state = Arc::new(AppState::new(config.clone())?);
    tracing::info!(
        "Duplicate-check cache initialized ({}s TTL)",
        config.duplicate_cache_ttl_secs
    );
    tracing::info!("✓ Record store client ready: {}", config.api_base_url);

    // 20 requests/second per IP, burst of 40; masking runs on every keystroke
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(40)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes = Router::new()
        .route("/api/v1/documents/validate", get(handlers::validate_document))
        .route("/api/v1/documents/mask", get(handlers::mask_document))
        .route(
            "/api/v1/credores/duplicate-check",
            get(handlers::check_duplicate),
        )
        .route("/api/v1/credores", get(handlers::search_creditors))
        .layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(64 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .await?;

    Ok(())
}

//! Mentiondesk Server
//!
//! Production server for the mention triage API:
//! - Operator APIs: mentions listing, triage, replies
//! - Login: bearer token issuance
//! - Status APIs: liveness, circuit health
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HTTP_PORT` | `8080` | HTTP API port |
//! | `DB_HOST` / `DB_PORT` / `DB_USER` / `DB_PASSWORD` / `DB_NAME` | `localhost:5432` | Postgres connection |
//! | `SOCIAL_MEDIA_API_URL` | `http://localhost:9000` | Upstream aggregator base URL |
//! | `SOCIAL_MEDIA_API_KEY` | - | Bearer credential for the aggregator |
//! | `SOCIAL_MEDIA_API_HISTORY_LAST_DAYS` | `7` | History sweep depth |
//! | `SOCIAL_PLATFORMS` | `bluesky` | Comma-separated platform list |
//! | `JWT_SECRET` | - | HS256 signing secret |
//! | `JWT_EXPIRES_IN` | `86400` | Token lifetime in seconds |
//! | `LOG_LEVEL` | `info` | Log level when RUST_LOG is unset |

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa_swagger_ui::SwaggerUi;

use md_api::{build_router, AppState, AuthKeys};
use md_config::AppConfig;
use md_engine::{
    default_registry, EngineContext, EngineSettings, MentionEngine, PgBreakerStateStore,
    spawn_recovery_loops, Store,
};
use md_gateway::{
    AggregatorClient, CircuitBreakerConfig, CircuitBreakerRegistry, HttpClientConfig,
    RetryPolicy, RetryPolicyConfig, SocialGateway, SocialGatewayConfig, SystemClock,
    TokioSleeper,
};

#[tokio::main]
async fn main() -> Result<()> {
    md_common::logging::init_logging("md-server");

    info!("Starting Mentiondesk Server");

    let config = AppConfig::load()?;
    info!(
        port = config.http.port,
        platforms = ?config.social.platforms,
        "Configuration loaded"
    );

    // Store
    let store = Store::connect(&config.database.url(), config.database.max_connections).await?;
    store.init_schema().await?;
    info!(database = %config.database.name, "Connected to Postgres");

    // Gateway stack: retry(breaker(http)) per platform
    let clock = Arc::new(SystemClock);
    let sleeper = Arc::new(TokioSleeper);
    let client = Arc::new(AggregatorClient::new(HttpClientConfig {
        base_url: config.social.base_url.clone(),
        api_key: config.social.api_key.clone(),
        connect_timeout: Duration::from_secs(10),
        request_timeout: Duration::from_secs(config.social.request_timeout_secs),
    })?);
    let breaker_store = Arc::new(PgBreakerStateStore::new(store.pool().clone()));
    let breakers = Arc::new(CircuitBreakerRegistry::new(
        CircuitBreakerConfig {
            max_failures: config.breaker.max_failures,
            reset_timeout: config.breaker.reset_timeout(),
        },
        clock.clone(),
        breaker_store,
    ));
    let retry = RetryPolicy::new(RetryPolicyConfig {
        max_retries: config.retry.max_retries,
        initial_delay: Duration::from_millis(config.retry.initial_delay_ms),
        max_delay: Duration::from_millis(config.retry.max_delay_ms),
        factor: config.retry.factor,
    });
    let social = Arc::new(SocialGateway::new(
        client,
        breakers,
        retry,
        SocialGatewayConfig {
            platforms: config.social.platforms.clone(),
            history_last_days: config.social.history_last_days,
        },
    ));

    // Engine
    let ctx = EngineContext::new(
        store,
        Arc::clone(&social),
        clock,
        sleeper,
        EngineSettings {
            wait_ms: config.engine.wait_ms,
            reply_interval: Duration::from_secs(config.engine.reply_interval_secs),
            fetch_interval: Duration::from_secs(config.engine.fetch_interval_secs),
            fan_out: config.engine.fan_out,
        },
    );
    let engine = MentionEngine::new(Arc::clone(&ctx), default_registry(&ctx));
    let recovery_handles = spawn_recovery_loops(&engine);
    info!(loops = recovery_handles.len(), "Recovery loops scheduled");

    // HTTP surface
    let auth = Arc::new(AuthKeys::from_secret(
        &config.auth.jwt_secret,
        Duration::from_secs(config.auth.jwt_expires_in_secs),
    ));
    let (router, api_doc) = build_router(AppState {
        engine,
        social,
        auth,
    });

    let app = router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", api_doc))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Mentiondesk Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Mentiondesk Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

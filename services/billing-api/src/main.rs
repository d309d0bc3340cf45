//! Tollgate Billing API
//!
//! Credit-gating billing service for an AI-agent platform.
//!
//! ## REST Endpoints
//!
//! - `POST /v1/billing/credits/check` - Authorisation decision
//! - `POST /v1/billing/charges` - Deduct credits
//! - `POST /v1/billing/credits` - Add credits (grant / refund / internal)
//! - `POST /v1/billing/accounts` - Upsert account
//! - `GET  /v1/billing/accounts/{provider}/{external_id}` - Fetch account
//! - `POST /v1/billing/purchases` - Create payment intent
//! - `GET  /v1/billing/purchases/{payment_id}` - Poll payment status
//! - `POST /v1/billing/webhooks/{provider}` - Provider-signed event ingress
//! - `POST /v1/tools/charge` - Product-scoped charge
//!
//! ## Health Endpoints
//!
//! - `GET /health` - Liveness + database reachability
//! - `GET /metrics` - Prometheus metrics

mod config;
mod error;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use tollgate_core::{stripe::StripeProvider, LedgerEngine, PaymentProvider, WebhookReconciler};
use tollgate_db::{create_pool, PgLedgerStore, PoolSettings};

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("billing_api=debug".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tollgate Billing API");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        http_port = config.http_port,
        payment_provider = %config.payment_provider,
        "Configuration loaded"
    );

    // Initialize metrics
    let metrics_handle = if config.metrics_enabled {
        Some(setup_metrics()?)
    } else {
        None
    };

    // Create database pools; pool acquisition is bounded by the request
    // deadline so exhaustion surfaces as 503 instead of a hung request.
    let pool_settings = PoolSettings {
        acquire_timeout: config.request_timeout,
        ..PoolSettings::default()
    };
    let pool = create_pool(&config.database_url, &pool_settings).await?;
    tollgate_db::MIGRATOR.run(&pool).await?;
    tracing::info!("Database pool created, migrations applied");

    let mut store = PgLedgerStore::new(pool.clone());
    if let Some(read_url) = &config.database_read_url {
        let replica = create_pool(read_url, &pool_settings).await?;
        store = store.with_replica(replica);
        tracing::info!("Read replica attached");
    }

    // Wire the engine, the payment gateway, and the reconciler
    let engine = Arc::new(LedgerEngine::new(Arc::new(store), config.ledger.clone()));
    let provider: Arc<dyn PaymentProvider> = Arc::new(StripeProvider::new(
        &config.stripe_secret_key,
        &config.stripe_webhook_secret,
    ));
    let reconciler = WebhookReconciler::new(Arc::clone(&engine), provider.name());

    let state = AppState::new(engine, reconciler, provider, pool, config.clone());

    // Build HTTP router and serve
    let app = build_router(state, metrics_handle);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    tracing::info!("HTTP server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let request_timeout = state.request_timeout();

    // API v1 routes
    let api_v1 = Router::new()
        .route("/billing/credits/check", post(handlers::check_credit))
        .route("/billing/credits", post(handlers::add_credits))
        .route("/billing/charges", post(handlers::create_charge))
        .route("/billing/accounts", post(handlers::upsert_account))
        .route(
            "/billing/accounts/{provider}/{external_id}",
            get(handlers::get_account),
        )
        .route("/billing/purchases", post(handlers::create_purchase))
        .route(
            "/billing/purchases/{payment_id}",
            get(handlers::get_purchase_status),
        )
        .route("/tools/charge", post(handlers::charge_tool));

    // Webhook route (separate - uses raw body, no JSON parsing)
    let webhook_routes = Router::new().route(
        "/v1/billing/webhooks/{provider}",
        post(handlers::provider_webhook),
    );

    // Health route (no timeout - must always respond quickly)
    let health_routes = Router::new().route("/health", get(handlers::health));

    // Metrics route (no timeout)
    let metrics_route = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    // Build middleware stack (order matters - outermost first)
    let middleware = ServiceBuilder::new()
        // Request ID propagation (outermost)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        // Tracing with request details
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // CORS
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        // Request timeout (innermost - closest to handler)
        .layer(TimeoutLayer::new(request_timeout));

    // Combine all routes
    Router::new()
        .nest("/v1", api_v1)
        .merge(webhook_routes)
        .layer(middleware)
        .merge(health_routes) // Health route without timeout
        .merge(metrics_route) // Metrics route without timeout
        .with_state(state)
}

fn setup_metrics() -> anyhow::Result<PrometheusHandle> {
    // Latency buckets optimized for ledger operations
    let ledger_latency_buckets = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.2, 0.5, 1.0, 2.5];

    let builder = PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("billing_operation_duration_seconds".to_string()),
        ledger_latency_buckets,
    )?;

    let handle = builder.install_recorder()?;

    // Register metrics with descriptions
    metrics::describe_counter!(
        "billing_credit_checks_total",
        "Total authorisation decisions by result"
    );
    metrics::describe_counter!("billing_charges_total", "Total charges by result");
    metrics::describe_counter!("billing_credits_total", "Total credits by result");
    metrics::describe_counter!(
        "billing_product_charges_total",
        "Total product charges by product type and result"
    );
    metrics::describe_counter!(
        "billing_purchases_created_total",
        "Total payment intents created"
    );
    metrics::describe_counter!(
        "billing_webhooks_processed_total",
        "Total webhooks processed by status"
    );
    metrics::describe_histogram!(
        "billing_operation_duration_seconds",
        "Ledger operation latency in seconds by operation type"
    );

    Ok(handle)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

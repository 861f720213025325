//! FieldLink Connect API
//!
//! Single-binary Rust service that owns the FieldHub integration edge:
//! 1. Runs the OAuth connect flow (authorize redirect + callback exchange)
//! 2. Keeps stored credentials fresh through the token broker
//! 3. Authenticates and ingests signed webhook deliveries
//! 4. Exposes connection management, health, and Prometheus metrics

mod config;
mod metrics;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Json;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fieldhub_auth::{StateGuard, build_authorization_url};
use fieldhub_store::Store;
use fieldhub_tokens::TokenBroker;
use fieldhub_webhooks::{Ingestor, Outcome, WebhookAuthenticator};

use crate::config::Config;

/// Signature header carried on every FieldHub webhook delivery.
const WEBHOOK_SIGNATURE_HEADER: &str = "x-fieldhub-hmac-sha256";

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    broker: Arc<TokenBroker>,
    guard: Arc<StateGuard>,
    ingestor: Arc<Ingestor>,
    store: Arc<Store>,
    provider: fieldhub_auth::ProviderConfig,
    /// Operator-facing base URL, no trailing slash
    base_url: String,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/oauth/start", get(oauth_start_handler))
        .route("/oauth/callback", get(oauth_callback_handler))
        .route("/webhooks/fieldhub", post(webhook_handler))
        .route("/connections", get(connections_handler))
        .route("/connections/{id}", delete(disconnect_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting fieldlink-connect-api");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let (config, secrets) = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        database = %config.app.database_path.display(),
        authorize_url = %config.provider.authorize_url,
        token_url = %config.provider.token_url,
        "configuration loaded"
    );

    let store = Arc::new(
        Store::open(&config.app.database_path).with_context(|| {
            format!(
                "failed to open database at {}",
                config.app.database_path.display()
            )
        })?,
    );

    let provider = config.provider_config(&secrets);
    let oauth = fieldhub_auth::OAuthClient::new(provider.clone(), config.provider_timeout())?;

    let state = AppState {
        broker: Arc::new(TokenBroker::new(store.clone(), oauth)),
        guard: Arc::new(StateGuard::new(secrets.state_secret.clone())),
        ingestor: Arc::new(Ingestor::new(
            WebhookAuthenticator::new(secrets.client_secret.clone()),
            store.clone(),
        )),
        store,
        provider,
        base_url: config.app.base_url.trim_end_matches('/').to_owned(),
        started_at: Instant::now(),
        prometheus: prometheus_handle,
    };

    let app = build_router(state, config.server.max_connections);

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;

    info!(addr = %config.server.listen_addr, "accepting requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

/// Begin the OAuth flow: mint a state token and redirect the operator to
/// FieldHub's authorize page.
async fn oauth_start_handler(State(state): State<AppState>) -> Response {
    match state.guard.mint() {
        Ok(token) => redirect(&build_authorization_url(&state.provider, &token)),
        Err(e) => {
            error!(error = %e, "failed to mint state token");
            error_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not start the FieldHub sign-in flow. Try again.",
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Complete the OAuth flow: verify the returned state, exchange the code,
/// and redirect the operator back to the connections page.
async fn oauth_callback_handler(
    State(app): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    // Provider-reported denial (operator clicked cancel, consent revoked)
    if let Some(provider_error) = params.error {
        metrics::record_oauth_connection("provider_denied");
        warn!(
            error = %provider_error,
            description = params.error_description.as_deref().unwrap_or(""),
            "authorization denied by provider"
        );
        return error_page(
            StatusCode::BAD_REQUEST,
            "FieldHub authorization was denied. No connection was created.",
        );
    }

    let (Some(code), Some(state_token)) = (params.code, params.state) else {
        return error_page(
            StatusCode::BAD_REQUEST,
            "The callback is missing its code or state parameter.",
        );
    };

    if let Err(e) = app.guard.verify(&state_token) {
        metrics::record_oauth_connection("state_rejected");
        warn!(error = %e, "callback state verification failed");
        let status = match e {
            fieldhub_auth::Error::InvalidSignature => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        };
        return error_page(
            status,
            "The sign-in link is invalid or has expired. Start again from the connections page.",
        );
    }

    match app.broker.connect(&code).await {
        Ok(connection) => {
            metrics::record_oauth_connection("connected");
            info!(connection_id = %connection.id, "FieldHub connection established");
            redirect(&format!("{}/connections", app.base_url))
        }
        Err(e) => {
            metrics::record_oauth_connection("exchange_failed");
            error!(error = %e, "authorization code exchange failed");
            error_page(
                StatusCode::BAD_REQUEST,
                "FieldHub did not accept the authorization code. Start the sign-in flow again.",
            )
        }
    }
}

/// Receive one signed webhook delivery.
///
/// The raw body bytes go to the ingestor untouched — the signature covers
/// the exact wire bytes. The response is fast in all cases: the handler only
/// authenticates and enqueues, never processes.
async fn webhook_handler(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();

    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let Some(signature) = signature else {
        metrics::record_webhook_delivery("rejected_signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"ok": false, "error": "missing signature"})),
        )
            .into_response();
    };

    let result = app.ingestor.ingest(&body, signature);
    metrics::record_ingest_duration(started.elapsed().as_secs_f64());

    match result {
        Ok(Outcome::Persisted { event_id }) => {
            metrics::record_webhook_delivery("persisted");
            info!(event_id = %event_id, "webhook delivery accepted");
            (StatusCode::OK, Json(json!({"ok": true}))).into_response()
        }
        Ok(Outcome::Deduped) => {
            metrics::record_webhook_delivery("deduped");
            (StatusCode::OK, Json(json!({"ok": true, "deduped": true}))).into_response()
        }
        Err(fieldhub_webhooks::Error::InvalidSignature) => {
            metrics::record_webhook_delivery("rejected_signature");
            warn!("webhook delivery failed signature verification");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"ok": false, "error": "invalid signature"})),
            )
                .into_response()
        }
        Err(fieldhub_webhooks::Error::MalformedPayload(detail)) => {
            metrics::record_webhook_delivery("rejected_payload");
            warn!(detail = %detail, "authenticated webhook delivery was not valid JSON");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"ok": false, "error": "malformed payload"})),
            )
                .into_response()
        }
        Err(fieldhub_webhooks::Error::Store(e)) => {
            metrics::record_webhook_delivery("error");
            // Content hash lets operators correlate with provider redelivery
            // without logging the payload itself
            let content_hash = hex::encode(Sha256::digest(&body));
            error!(error = %e, content_hash = %content_hash, "failed to persist webhook delivery");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "error": "internal error"})),
            )
                .into_response()
        }
    }
}

/// List connections for the operator UI.
async fn connections_handler(State(app): State<AppState>) -> Response {
    match app.store.list_connections() {
        Ok(connections) => Json(json!({"connections": connections})).into_response(),
        Err(e) => {
            error!(error = %e, "failed to list connections");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
                .into_response()
        }
    }
}

/// Disconnect a FieldHub account: removes the connection and its credential.
/// Ingested events are kept for audit.
async fn disconnect_handler(State(app): State<AppState>, Path(id): Path<String>) -> Response {
    match app.broker.disconnect(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(fieldhub_tokens::Error::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "connection not found"})),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, connection_id = %id, "failed to disconnect");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
                .into_response()
        }
    }
}

/// Health endpoint: 200 with store counts when the database answers,
/// 503 when it does not.
async fn health_handler(State(app): State<AppState>) -> Response {
    let uptime = app.started_at.elapsed().as_secs();

    let counts = app.store.count_connections().and_then(|connections| {
        let events = app.store.count_events()?;
        let pending_jobs = app.store.pending_job_count()?;
        Ok((connections, events, pending_jobs))
    });

    let (status, body) = match counts {
        Ok((connections, events, pending_jobs)) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "connections": connections,
                "events": events,
                "pending_jobs": pending_jobs,
                "uptime_seconds": uptime,
            }),
        ),
        Err(e) => {
            error!(error = %e, "health check failed to query store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "status": "degraded",
                    "uptime_seconds": uptime,
                }),
            )
        }
    };

    (status, Json(body)).into_response()
}

/// Prometheus metrics endpoint — returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Plain 302 redirect. The OAuth flow is browser-driven and providers expect
/// the classic Found status, not axum's default 303.
fn redirect(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(axum::http::header::LOCATION, location)],
        (),
    )
        .into_response()
}

/// Minimal operator-facing HTML error page for the browser-driven OAuth flow.
fn error_page(status: StatusCode, message: &str) -> Response {
    (
        status,
        Html(format!(
            "<!DOCTYPE html><html><head><title>FieldLink</title></head>\
             <body><h1>Something went wrong</h1><p>{message}</p></body></html>"
        )),
    )
        .into_response()
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

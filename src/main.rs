use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::env;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bulker_dispatch::config::BulkerConfig;
use bulker_dispatch::dispatch::{Dispatcher, InvocationContext};
use bulker_dispatch::event::AnalyticsEvent;
use bulker_dispatch::shutdown::ShutdownSignal;

const CORRELATION_HEADER: &str = "x-correlation-id";
const WORKSPACE_HEADER: &str = "x-workspace-id";
const STREAM_HEADER: &str = "x-stream-id";
const CONNECTION_HEADER: &str = "x-connection-id";

/// Application metrics
struct Metrics {
    events_received: AtomicU64,
    events_delivered: AtomicU64,
    events_failed: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

struct AppState {
    dispatcher: Dispatcher,
    invocation: InvocationContext,
    api_key: String,
    metrics: Metrics,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BulkerConfig::load()?;
    let dispatcher = config.build_dispatcher()?;

    let api_key = config
        .server
        .api_key
        .clone()
        .or_else(|| env::var("BULKER_DISPATCH_API_KEY").ok())
        .unwrap_or_else(|| {
            warn!("No API key configured, defaulting to 'dev-key'. DO NOT USE IN PRODUCTION.");
            "dev-key".to_string()
        });

    let state = Arc::new(AppState {
        dispatcher,
        invocation: config.invocation_context(),
        api_key,
        metrics: Metrics::new(),
    });

    let shutdown = ShutdownSignal::new();
    tokio::spawn(shutdown.clone().watch_os_signals());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Bulker dispatch server listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown.triggered_owned())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route("/api/v1/events", post(ingest_event))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path();
    if path == "/health" || path == "/metrics" {
        return Ok(next.run(req).await);
    }

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match token {
        Some(token) if token == state.api_key => Ok(next.run(req).await),
        Some(_) => {
            warn!("Invalid API Key attempt");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Missing or malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let destination = state.dispatcher.config();
    Json(json!({
        "status": "ok",
        "destination": destination.destination_id,
        "layout": destination.data_layout.as_str(),
    }))
}

/// Server metrics as JSON
async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    let metrics = &state.metrics;
    let uptime = metrics.uptime_seconds();

    let uptime_str = if uptime < 60 {
        format!("{}s", uptime)
    } else if uptime < 3600 {
        format!("{}m {}s", uptime / 60, uptime % 60)
    } else {
        format!("{}h {}m {}s", uptime / 3600, (uptime % 3600) / 60, uptime % 60)
    };

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime,
        "uptime": uptime_str,
        "events": {
            "received": metrics.events_received.load(Ordering::Relaxed),
            "delivered": metrics.events_delivered.load(Ordering::Relaxed),
            "failed": metrics.events_failed.load(Ordering::Relaxed),
        },
        "status": "running"
    }))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Configured invocation context, with per-request header overrides.
fn invocation_for(defaults: &InvocationContext, headers: &HeaderMap) -> InvocationContext {
    let mut ctx = defaults.clone();
    if let Some(v) = header_str(headers, WORKSPACE_HEADER) {
        ctx.workspace_id = v.to_string();
    }
    if let Some(v) = header_str(headers, STREAM_HEADER) {
        ctx.stream_id = v.to_string();
    }
    if let Some(v) = header_str(headers, CONNECTION_HEADER) {
        ctx.connection_id = v.to_string();
    }
    ctx
}

async fn ingest_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(event): Json<AnalyticsEvent>,
) -> Response {
    state.metrics.events_received.fetch_add(1, Ordering::Relaxed);

    let correlation_id = header_str(&headers, CORRELATION_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let ctx = invocation_for(&state.invocation, &headers);

    debug!(
        correlation_id = %correlation_id,
        event_type = ?event.kind(),
        workspace_id = %ctx.workspace_id,
        "Received event"
    );

    let mut response = match state.dispatcher.dispatch(event, &ctx).await {
        Ok(event) => {
            state.metrics.events_delivered.fetch_add(1, Ordering::Relaxed);
            info!(correlation_id = %correlation_id, "Event dispatched");
            (StatusCode::OK, Json(event)).into_response()
        }
        Err(e) => {
            state.metrics.events_failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                correlation_id = %correlation_id,
                error = %e,
                "Event dispatch failed, upstream should retry"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": e.to_string(),
                    "retryable": e.is_retryable(),
                    "correlationId": correlation_id,
                })),
            )
                .into_response()
        }
    };

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

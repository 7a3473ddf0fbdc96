use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod fetch;
pub mod metrics;
pub mod units;
pub mod workload;

use crate::config::LoadKitConfig;
use crate::fetch::{HttpUpstream, Upstream};
use crate::metrics::{GaugeGuard, Metrics};
use crate::units::format_duration;
use crate::workload::{CpuQuery, MemoryQuery, RelayQuery, StopSignal, TimeQuery};

#[derive(Error, Debug)]
pub enum LoadKitError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Internal server error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, LoadKitError>;

impl IntoResponse for LoadKitError {
    fn into_response(self) -> Response {
        let status = match self {
            LoadKitError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            LoadKitError::NetworkError(_) => StatusCode::BAD_GATEWAY,
            LoadKitError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            LoadKitError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Everything a handler can reach. Owned by the router; nothing here is
/// process global.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<LoadKitConfig>,
    pub metrics: Metrics,
    pub upstream: Arc<dyn Upstream>,
    /// Cancelled when the server begins a graceful shutdown.
    pub shutdown: CancellationToken,
    pub started_at: i64,
}

impl AppState {
    pub fn new(config: LoadKitConfig) -> Result<Self> {
        let upstream = Arc::new(HttpUpstream::new(config.relay_max_body));
        Ok(Self {
            config: Arc::new(config),
            metrics: Metrics::new()?,
            upstream,
            shutdown: CancellationToken::new(),
            started_at: time::OffsetDateTime::now_utc().unix_timestamp(),
        })
    }

    pub fn with_upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = upstream;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

async fn root_handler() -> &'static str {
    "move along, nothing to see here"
}

async fn cpu_handler(
    State(state): State<AppState>,
    Query(query): Query<CpuQuery>,
) -> Result<String> {
    let params = query.resolve()?;
    tracing::debug!(
        duration = %format_duration(params.duration),
        operations = params.operations,
        parallel = params.parallel,
        "burning cpu"
    );

    let _active = GaugeGuard::raise(&state.metrics.cpu_burns_active, 1);
    let stop = StopSignal::new();
    // a dropped request (client went away) stops the burn
    let _stop_on_drop = stop.stop_on_drop();

    let burn = if params.parallel {
        workload::burn_parallel(params.duration, stop.clone()).await
    } else {
        let signal = stop.clone();
        tokio::task::spawn_blocking(move || {
            workload::burn(params.duration, params.operations, &signal)
        })
        .await
        .map_err(|e| LoadKitError::InternalError(format!("cpu worker failed: {e}")))?
    };
    state
        .metrics
        .record_cpu(burn.operations, burn.elapsed, burn.workers);

    let elapsed = format_duration(burn.elapsed);
    if params.parallel {
        Ok(format!(
            "consumed CPU on {} workers for {} operations in {}\n",
            burn.workers, burn.operations, elapsed
        ))
    } else {
        Ok(format!(
            "consumed CPU for {} operations in {}\n",
            burn.operations, elapsed
        ))
    }
}

async fn memory_handler(
    State(state): State<AppState>,
    Query(query): Query<MemoryQuery>,
) -> Result<String> {
    let params = query.resolve()?;
    let len = params.block_len()?;
    tracing::debug!(size = %params.size, hold = %format_duration(params.hold), "allocating memory");

    let allocation = tokio::task::spawn_blocking(move || workload::allocate(len))
        .await
        .map_err(|e| LoadKitError::InternalError(format!("allocation failed: {e}")))?;
    tracing::debug!(bytes = allocation.len(), pages = allocation.pages(), "memory committed");
    let held = i64::try_from(allocation.len()).unwrap_or(i64::MAX);
    let _held = GaugeGuard::raise(&state.metrics.memory_held_bytes, held);
    state
        .metrics
        .memory_allocated_bytes_total
        .inc_by(allocation.len() as u64);

    if !params.hold.is_zero() {
        workload::sleep_for(params.hold, &state.shutdown).await;
    }

    let body = format!(
        "allocated {} ({} bytes) of memory\n",
        params.size,
        allocation.len()
    );
    drop(allocation);
    Ok(body)
}

async fn time_handler(
    State(state): State<AppState>,
    Query(query): Query<TimeQuery>,
) -> Result<String> {
    let duration = query.resolve()?;
    let delay = workload::sleep_for(duration, &state.shutdown).await;
    if !delay.completed {
        return Err(LoadKitError::Unavailable(format!(
            "interrupted after {} by shutdown",
            format_duration(delay.elapsed)
        )));
    }
    Ok(format!("slept for {}\n", format_duration(duration)))
}

async fn relay_handler(
    State(state): State<AppState>,
    Query(query): Query<RelayQuery>,
) -> Result<Response> {
    // validated before any network traffic
    let url = query.resolve()?;
    tracing::debug!(%url, "relaying request");

    let relayed = match state.upstream.get(&url).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(%url, error = %e, "relay failed");
            state
                .metrics
                .relay_requests_total
                .with_label_values(&["error"])
                .inc();
            return Err(e);
        }
    };
    state
        .metrics
        .relay_requests_total
        .with_label_values(&["ok"])
        .inc();

    let status = StatusCode::from_u16(relayed.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut headers = HeaderMap::new();
    if let Some(ct) = relayed.content_type {
        if let Ok(value) = HeaderValue::from_str(ct.as_ref()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
    }
    Ok((status, headers, relayed.body).into_response())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    use serde_json::json;

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "loadkit",
        "started_at": state.started_at,
    }))
}

/// Metrics endpoint (Prometheus text exposition)
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.encode_text() {
        Ok(buf) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            buf,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "encode metrics failed");
            e.into_response()
        }
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Builds the HTTP surface around an existing state.
pub fn app(state: AppState) -> Router {
    let observability_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    let workload_routes = Router::new()
        .route("/", get(root_handler))
        .route("/cpu", get(cpu_handler))
        .route("/memory", get(memory_handler))
        .route("/time", get(time_handler));

    // Only the relay can be pointed at third parties, so only it is limited.
    let mut relay_routes = Router::new().route("/request", get(relay_handler));
    if let Some(limit) = state.config.relay_rate_limit {
        match GovernorConfigBuilder::default()
            .per_second(limit.per_second)
            .burst_size(limit.burst)
            .finish()
        {
            Some(conf) => {
                tracing::info!(
                    per_second = limit.per_second,
                    burst = limit.burst,
                    "relay rate limiting enabled"
                );
                relay_routes = relay_routes.layer(GovernorLayer {
                    config: Box::leak(Box::new(conf)),
                });
            }
            None => tracing::warn!("relay rate limit rejected, relay is unlimited"),
        }
    }

    Router::new()
        .merge(observability_routes)
        .merge(workload_routes)
        .merge(relay_routes)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            metrics::track_requests,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}

/// Builds a ready-to-serve router from configuration.
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` when
/// the relay rate limit is enabled, since limits are keyed by peer address.
pub fn router(config: LoadKitConfig) -> Result<Router> {
    Ok(app(AppState::new(config)?))
}

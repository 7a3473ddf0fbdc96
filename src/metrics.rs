use std::time::{Duration, Instant};

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use prometheus::{
    Counter, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use crate::{LoadKitError, Result};

/// Prometheus collectors for one server instance. Cloning shares the
/// underlying registry.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub cpu_operations_total: IntCounter,
    pub cpu_busy_seconds_total: Counter,
    pub cpu_burns_active: IntGauge,
    pub memory_allocated_bytes_total: IntCounter,
    pub memory_held_bytes: IntGauge,
    pub relay_requests_total: IntCounterVec,
}

fn internal(what: &str, e: prometheus::Error) -> LoadKitError {
    LoadKitError::InternalError(format!("{what}: {e}"))
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("loadkit_http_requests_total", "HTTP requests served"),
            &["method", "route", "status"],
        )
        .map_err(|e| internal("create http_requests_total", e))?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "loadkit_http_request_duration_seconds",
                "HTTP request latency in seconds",
            ),
            &["method", "route"],
        )
        .map_err(|e| internal("create http_request_duration_seconds", e))?;
        let cpu_operations_total = IntCounter::with_opts(Opts::new(
            "loadkit_cpu_operations_total",
            "busy-loop iterations performed",
        ))
        .map_err(|e| internal("create cpu_operations_total", e))?;
        let cpu_busy_seconds_total = Counter::with_opts(Opts::new(
            "loadkit_cpu_busy_seconds_total",
            "wall time spent burning CPU, summed over workers",
        ))
        .map_err(|e| internal("create cpu_busy_seconds_total", e))?;
        let cpu_burns_active =
            IntGauge::with_opts(Opts::new("loadkit_cpu_burns_active", "burns in progress"))
                .map_err(|e| internal("create cpu_burns_active", e))?;
        let memory_allocated_bytes_total = IntCounter::with_opts(Opts::new(
            "loadkit_memory_allocated_bytes_total",
            "bytes allocated by memory workloads",
        ))
        .map_err(|e| internal("create memory_allocated_bytes_total", e))?;
        let memory_held_bytes = IntGauge::with_opts(Opts::new(
            "loadkit_memory_held_bytes",
            "bytes currently held by memory workloads",
        ))
        .map_err(|e| internal("create memory_held_bytes", e))?;
        let relay_requests_total = IntCounterVec::new(
            Opts::new("loadkit_relay_requests_total", "outbound relay requests"),
            &["outcome"],
        )
        .map_err(|e| internal("create relay_requests_total", e))?;

        registry
            .register(Box::new(http_requests_total.clone()))
            .map_err(|e| internal("register http_requests_total", e))?;
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .map_err(|e| internal("register http_request_duration_seconds", e))?;
        registry
            .register(Box::new(cpu_operations_total.clone()))
            .map_err(|e| internal("register cpu_operations_total", e))?;
        registry
            .register(Box::new(cpu_busy_seconds_total.clone()))
            .map_err(|e| internal("register cpu_busy_seconds_total", e))?;
        registry
            .register(Box::new(cpu_burns_active.clone()))
            .map_err(|e| internal("register cpu_burns_active", e))?;
        registry
            .register(Box::new(memory_allocated_bytes_total.clone()))
            .map_err(|e| internal("register memory_allocated_bytes_total", e))?;
        registry
            .register(Box::new(memory_held_bytes.clone()))
            .map_err(|e| internal("register memory_held_bytes", e))?;
        registry
            .register(Box::new(relay_requests_total.clone()))
            .map_err(|e| internal("register relay_requests_total", e))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            cpu_operations_total,
            cpu_busy_seconds_total,
            cpu_burns_active,
            memory_allocated_bytes_total,
            memory_held_bytes,
            relay_requests_total,
        })
    }

    pub fn record_cpu(&self, operations: u64, elapsed: Duration, workers: usize) {
        self.cpu_operations_total.inc_by(operations);
        self.cpu_busy_seconds_total
            .inc_by(elapsed.as_secs_f64() * workers as f64);
    }

    pub fn encode_text(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder
            .encode(&mf, &mut buf)
            .map_err(|e| internal("encode metrics", e))?;
        Ok(buf)
    }
}

/// Keeps a gauge raised for as long as the guard lives.
pub struct GaugeGuard {
    gauge: IntGauge,
    amount: i64,
}

impl GaugeGuard {
    pub fn raise(gauge: &IntGauge, amount: i64) -> Self {
        gauge.add(amount);
        Self { gauge: gauge.clone(), amount }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.sub(self.amount);
    }
}

/// Middleware recording request count and latency per matched route.
pub async fn track_requests(State(metrics): State<Metrics>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    // unmatched paths share one label so scanners cannot blow up cardinality
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), route.as_str(), status.as_str()])
        .inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(&[method.as_str(), route.as_str()])
        .observe(start.elapsed().as_secs_f64());
    response
}

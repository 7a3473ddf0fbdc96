use loadkit::{
    app,
    config::{LoadKitConfig, DEFAULT_LOG_FILTER},
    workload, AppState,
};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

/// loadkit standalone server entry point.
///
/// Initializes tracing, reads configuration, optionally allocates a startup
/// memory ballast, and serves the workload endpoints until Ctrl-C.
///
/// # Configuration
/// Environment variables:
/// - `HTTP_PORT`: listen port or `host:port` address (default: 8480)
/// - `BIND_ADDR`: listen address (default: 0.0.0.0)
/// - `INIT_MEMORY_SIZE`: memory held for the whole process lifetime, e.g. `256MB`
/// - `RELAY_MAX_BODY_SIZE`: cap on relayed upstream bodies
/// - `RELAY_RATE_LIMIT_PER_SECOND` / `RELAY_RATE_LIMIT_BURST`: per-IP relay limit
/// - `RUST_LOG`: logging verbosity (default: "loadkit=debug,tower_http=debug")
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    tracing::info!("Starting loadkit server");

    let cfg = LoadKitConfig::from_env()?;

    // Held until main returns.
    let _ballast = match cfg.init_memory_size {
        Some(size) => {
            let block = workload::allocate(usize::try_from(size.bytes())?);
            tracing::info!(
                size = %size,
                bytes = block.len(),
                pages = block.pages(),
                "allocated initial memory"
            );
            Some(block)
        }
        None => None,
    };

    let shutdown = CancellationToken::new();
    let state = AppState::new(cfg.clone())?.with_shutdown(shutdown.clone());
    let router = app(state);

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => tracing::error!(error = %e, "cannot listen for shutdown signal"),
            }
        }
    });

    let addr = cfg.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

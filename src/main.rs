use axum::{
    Router,
    routing::{delete, get, post},
};
use clap::Parser; // for cli
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use storefront_governor::batcher::BatchCoalescer;
use storefront_governor::cache::build_cache;
use storefront_governor::config::Args;
use storefront_governor::handlers::{health_handler, invalidate_handler, metrics_handler, query_handler};
use storefront_governor::state::AppState;
use storefront_governor::upstream::UpstreamClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("storefront_governor=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // parse cli arguments
    let args = Args::parse();
    let config = args.governor_config();
    config.rate_limit.validate()?;

    let sweep_interval = (args.sweep_interval > 0).then(|| Duration::from_secs(args.sweep_interval));
    let cache = build_cache(
        args.cache_backend,
        &args.redis_url,
        &config.cache_prefix,
        config.default_cache_ttl,
        sweep_interval,
    )
    .await?;

    let max_waiting_time = config.rate_limit.max_waiting_time;
    let rate_limit = config.rate_limit.clone();
    let governor = BatchCoalescer::from_config(config, cache)?;
    let upstream = UpstreamClient::new(
        reqwest::Client::new(),
        &args.endpoint,
        args.token_header.clone(),
        args.access_token.clone(),
    );

    info!(
        profile = args.profile.name(),
        requests_per_window = rate_limit.requests_per_window,
        window_ms = rate_limit.window.as_millis() as u64,
        queue_timeout_ms = rate_limit.queue_timeout.as_millis() as u64,
        "Rate limit configured"
    );
    info!("Forwarding to {}", upstream.endpoint());
    info!(backend = ?args.cache_backend, ttl_secs = args.cache_ttl, "Result cache ready");

    let state = Arc::new(AppState {
        governor,
        upstream,
        profile: args.profile,
        max_waiting_time,
    });

    //creating the router with routes
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/query", post(query_handler))
        .route("/api/cache/{key}", delete(invalidate_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Gateway running on http://localhost:{}", args.port);
    axum::serve(listener, app).await?;
    Ok(())
}

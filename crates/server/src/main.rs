//! Compute API server
//!
//! Authenticated HTTP API over the compute dispatcher: memoized numeric
//! computations in isolated workers, a request audit trail, and a
//! background host resource sampler.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use compute_lib::{
    health::{components, HealthRegistry},
    observability::ServiceMetrics,
    store::{ResultStore, SqliteStore},
    Dispatcher, DispatcherConfig, HostSampler, SamplerConfig,
};
use compute_server::{api, auth, config};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs with env-filter, default level info
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = SERVER_VERSION, "Starting compute-server");

    let config = config::ServerConfig::load()?;

    let db_path = Path::new(&config.database_path);
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = SqliteStore::open(db_path)?;

    if let (Some(email), Some(password)) = (&config.bootstrap_email, &config.bootstrap_password) {
        let user = store.create_user(email, password).await?;
        info!(email = %user.email, "Bootstrap user present");
    }

    let health_registry = HealthRegistry::new();
    health_registry.register(components::DISPATCHER).await;
    health_registry.register(components::STORE).await;
    health_registry.register(components::SAMPLER).await;

    let metrics = ServiceMetrics::new();

    let store: Arc<dyn ResultStore> = Arc::new(store.clone());
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        metrics.clone(),
        DispatcherConfig {
            max_concurrent: match config.max_concurrent_computations {
                0 => None,
                n => Some(n),
            },
            compute_timeout: match config.compute_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        },
    );

    let mut sampler = HostSampler::new(
        Arc::clone(&store),
        metrics.clone(),
        SamplerConfig {
            interval: Duration::from_secs(config.sample_interval_secs.max(1)),
        },
    );
    sampler.start();

    let auth = auth::AuthKeys::new(&config.jwt_secret, config.token_ttl_hours);
    let app_state = Arc::new(api::AppState::new(
        dispatcher,
        store,
        health_registry.clone(),
        metrics,
        auth,
    ));

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    info!("SIGINT received, shutting down");

    health_registry.set_ready(false).await;
    sampler.stop().await;
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

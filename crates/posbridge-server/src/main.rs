mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use posbridge_cache::{CacheSettings, PgConfigLoader, RefreshOutcome, StoreConfigService};
use posbridge_core::{SystemClock, TimezoneResolver};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, AppState},
    middleware::{AuthState, RateLimitSettings, RateLimitState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = posbridge_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    tracing::debug!(?config, "loaded configuration");

    let pool_config = posbridge_db::PoolConfig::from_app_config(&config);
    let pool = posbridge_db::connect_pool(&config.database_url, pool_config).await?;
    posbridge_db::run_migrations(&pool).await?;

    let resolver = TimezoneResolver::new(config.business_day_cutoff_hour)?;
    let service = Arc::new(StoreConfigService::new(
        Arc::new(PgConfigLoader::new(pool.clone())),
        Arc::new(SystemClock),
        CacheSettings::from_app_config(&config),
        resolver,
    ));

    if let Some(path) = &config.snapshot_path {
        match service.warm_start(path).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!("warm start skipped; cache already loaded"),
            Err(e) => tracing::warn!(error = %e, "warm start unavailable; starting cold"),
        }
    }
    if let RefreshOutcome::Failed(e) = service.refresh_cache().await {
        tracing::warn!(error = %e, "initial store-config load failed; will retry");
    }

    let _scheduler = scheduler::build_scheduler(Arc::clone(&service), &config.refresh_cron).await?;

    let auth = AuthState::from_env(matches!(
        config.env,
        posbridge_core::Environment::Development
    ))?;
    let rate_limit = RateLimitState::new(RateLimitSettings::from_app_config(&config));
    let app = build_app(AppState { service, pool }, auth, rate_limit);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, env = %config.env, "posbridge-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
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

    tracing::info!("received shutdown signal, starting graceful shutdown");
}

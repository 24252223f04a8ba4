use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use legalease::{
    auth::jwt::JwtService, config::AppConfig, converter::provider_from_config, db,
    default_handlers, state::AppState, TimeoutSweeper, Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = db::DEFAULT_MAX_POOL_SIZE,
        conversion_enabled = config.conversion_endpoint.is_some(),
        sweep_interval_secs = config.timeout_sweep_interval_secs,
        "loaded configuration"
    );
    // One connection for the job loop, one for the sweeper.
    let pool = db::init_pool(&config.database_url)?;
    let converter = provider_from_config(&config)?;
    let jwt = JwtService::from_config(&config)?;

    let poll_interval = Duration::from_secs(config.worker_poll_interval_secs);
    let sweep_interval = Duration::from_secs(config.timeout_sweep_interval_secs);
    let state = Arc::new(AppState::new(pool, config, converter, jwt));

    let worker = Worker::new(state.clone(), default_handlers(), poll_interval);
    let sweeper = TimeoutSweeper::new(state, sweep_interval);

    tokio::select! {
        _ = worker.run() => {}
        _ = sweeper.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

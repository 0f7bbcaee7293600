use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tokio_util::sync::CancellationToken;

use accrual_agent::initialization::init_logger_with;
use accrual_agent::{
    init_db_pool_with_path, run_migrations, Config, HttpAccrualClient, Opt, SqliteOrderStore,
    Supervisor,
};

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    let config = Config::from(opt);

    init_logger_with(config.log_level.clone().into(), config.log_format.clone())
        .context("Failed to initialize logger")?;

    let pool = init_db_pool_with_path(&config.database_path)
        .await
        .context("Failed to initialize database pool")?;
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let store = Arc::new(SqliteOrderStore::new(
        pool.clone(),
        config.processing_stale_after,
    ));
    let client = Arc::new(
        HttpAccrualClient::new(config.accrual_base_url.clone(), config.call_timeout)
            .context("Failed to initialize HTTP client")?,
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    info!(
        "Polling calculator at {} (db: {})",
        config.accrual_base_url,
        config.database_path.display()
    );

    let supervisor = Supervisor::new(client, store, config);
    let stats = supervisor.stats();
    supervisor
        .run(shutdown)
        .await
        .context("Polling subsystem failed")?;

    stats.log_summary();
    pool.close().await;

    Ok(())
}

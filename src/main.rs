//! venue-settlement daemon
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌─────────────────┐
//! │  Config  │───▶│ Logging  │───▶│ Postgres │───▶│ OutboxPublisher │──▶ Redis
//! │  (YAML)  │    │(tracing) │    │ (schema) │    │  (poll loop)    │
//! └──────────┘    └──────────┘    └──────────┘    └─────────────────┘
//! ```
//!
//! Settlement operations are invoked in-process by the request handlers that
//! link this crate; the daemon owns the background side: schema bootstrap and
//! draining the outbox until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::Instrument;

use venue_settlement::config::{AppConfig, WithdrawalSizingMode};
use venue_settlement::db::{Database, schema};
use venue_settlement::logging;
use venue_settlement::outbox::{OutboxPublisher, RedisTaskDistributor};
use venue_settlement::settlement::{AccountBalanceSizing, SettlementService};
use venue_settlement::store::PgStore;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = logging::init_logging(&app_config);

    run(app_config).instrument(logging::service_span(&env)).await
}

async fn run(app_config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(git = env!("GIT_HASH"), "Starting {}", logging::SERVICE_NAME);

    let db = Database::connect(&app_config.postgres)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.health_check().await.context("PostgreSQL health check failed")?;
    if app_config.postgres.init_schema {
        schema::init_schema(db.pool()).await?;
    }

    let store = Arc::new(PgStore::new(db.pool().clone()));
    let mut service = SettlementService::new(store)
        .with_verify_email_task(app_config.verify_email_task.clone());
    if app_config.settlement.withdrawal_sizing == WithdrawalSizingMode::AccountBalance {
        service = service.with_sizing(Arc::new(AccountBalanceSizing));
    }
    tracing::info!(
        withdrawal_sizing = service.sizing_policy(),
        "Settlement service ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let publisher_handle = if app_config.outbox.enabled {
        let distributor = RedisTaskDistributor::connect(
            &app_config.redis.url,
            &app_config.redis.stream_prefix,
        )
        .await
        .context("Failed to connect to Redis")?;
        let publisher = OutboxPublisher::new(
            service.executor().clone(),
            Arc::new(distributor),
            app_config.outbox.publisher_config(),
        );
        Some(tokio::spawn(
            async move { publisher.run(shutdown_rx).await }.in_current_span(),
        ))
    } else {
        tracing::warn!("Outbox publisher disabled; verification emails will queue up");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    // Receiver may already be gone if the publisher task exited
    let _ = shutdown_tx.send(true);
    if let Some(handle) = publisher_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Outbox publisher task failed");
        }
    }

    tracing::info!("{} stopped", logging::SERVICE_NAME);
    Ok(())
}

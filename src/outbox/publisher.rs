//! Outbox Publisher
//!
//! Background worker that drains pending outbox rows into the task queue.
//!
//! Each batch runs in one store transaction: claim rows (`SKIP LOCKED`, so
//! several publishers can share the table), distribute each, record the
//! outcome, commit. A distributor failure is recorded on the row and retried
//! on a later batch until `max_attempts`, after which the row is parked as
//! `failed`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::distributor::TaskDistributor;
use crate::error::{SettlementError, StoreContext};
use crate::executor::TxExecutor;
use crate::store::{Store, StoreTx};

/// Configuration for the outbox publisher
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// How often to poll for pending rows
    pub poll_interval: Duration,
    /// Maximum rows claimed per batch
    pub batch_size: i64,
    /// Distributor failures before a row is marked failed
    pub max_attempts: i32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
            max_attempts: 10,
        }
    }
}

/// Outcome of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub published: usize,
    pub failed: usize,
    pub gave_up: usize,
}

pub struct OutboxPublisher<S: Store> {
    executor: Arc<TxExecutor<S>>,
    distributor: Arc<dyn TaskDistributor>,
    config: PublisherConfig,
}

impl<S: Store> OutboxPublisher<S> {
    pub fn new(
        executor: Arc<TxExecutor<S>>,
        distributor: Arc<dyn TaskDistributor>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            executor,
            distributor,
            config,
        }
    }

    /// Poll until `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            distributor = self.distributor.name(),
            "Starting outbox publisher"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.publish_batch().await {
                error!(error = %e, code = e.code(), "Outbox batch failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Outbox publisher stopped");
    }

    /// Claim, distribute and mark one batch of pending rows
    pub async fn publish_batch(&self) -> Result<BatchReport, SettlementError> {
        let distributor = self.distributor.clone();
        let batch_size = self.config.batch_size;
        let max_attempts = self.config.max_attempts;

        let report = self
            .executor
            .exec_tx("publish_outbox", move |tx| {
                Box::pin(async move {
                    let pending = tx
                        .claim_pending_outbox(batch_size)
                        .await
                        .context("failed to claim outbox rows")?;

                    let mut report = BatchReport::default();
                    for msg in pending {
                        match distributor.distribute(&msg).await {
                            Ok(task_id) => {
                                tx.mark_outbox_published(msg.id)
                                    .await
                                    .context("failed to mark outbox row published")?;
                                debug!(outbox_id = msg.id, task_id = %task_id, "Outbox row published");
                                report.published += 1;
                            }
                            Err(e) => {
                                let give_up = msg.attempts + 1 >= max_attempts;
                                tx.record_outbox_failure(msg.id, &e.to_string(), give_up)
                                    .await
                                    .context("failed to record outbox failure")?;
                                if give_up {
                                    error!(
                                        outbox_id = msg.id,
                                        task_type = %msg.task_type,
                                        attempts = msg.attempts + 1,
                                        error = %e,
                                        "Giving up on outbox row"
                                    );
                                    report.gave_up += 1;
                                } else {
                                    warn!(
                                        outbox_id = msg.id,
                                        attempts = msg.attempts + 1,
                                        error = %e,
                                        "Outbox distribution failed"
                                    );
                                    report.failed += 1;
                                }
                            }
                        }
                    }
                    Ok(report)
                })
            })
            .await?;

        if report != BatchReport::default() {
            info!(
                published = report.published,
                failed = report.failed,
                gave_up = report.gave_up,
                "Outbox batch done"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewUser, OutboxStatus, UserRole};
    use crate::outbox::distributor::MemoryDistributor;
    use crate::settlement::SettlementService;
    use crate::store::MemoryStore;

    async fn setup(
        users: &[&str],
        config: PublisherConfig,
    ) -> (Arc<MemoryStore>, Arc<MemoryDistributor>, OutboxPublisher<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = SettlementService::new(store.clone());
        for name in users {
            service
                .create_user(NewUser {
                    username: name.to_string(),
                    email: format!("{name}@example.com"),
                    password_hash: "hash".into(),
                    role: UserRole::User,
                })
                .await
                .unwrap();
        }
        let distributor = Arc::new(MemoryDistributor::new());
        let publisher = OutboxPublisher::new(service.executor().clone(), distributor.clone(), config);
        (store, distributor, publisher)
    }

    #[tokio::test]
    async fn test_publishes_pending_rows() {
        let (store, distributor, publisher) =
            setup(&["alice", "bob"], PublisherConfig::default()).await;

        let report = publisher.publish_batch().await.unwrap();
        assert_eq!(report.published, 2);

        let delivered = distributor.delivered();
        assert_eq!(delivered[0].payload["email"], "alice@example.com");
        assert_eq!(delivered[1].payload["email"], "bob@example.com");
        assert!(store
            .outbox_messages()
            .await
            .iter()
            .all(|m| m.status == OutboxStatus::Published && m.published_at.is_some()));

        // Nothing left to do
        let report = publisher.publish_batch().await.unwrap();
        assert_eq!(report, BatchReport::default());
        assert_eq!(distributor.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_retried_on_next_batch() {
        let (store, distributor, publisher) = setup(&["alice"], PublisherConfig::default()).await;
        distributor.fail_next(1);

        let report = publisher.publish_batch().await.unwrap();
        assert_eq!(report.failed, 1);
        let row = &store.outbox_messages().await[0];
        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.attempts, 1);
        assert!(row.last_error.is_some());

        let report = publisher.publish_batch().await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(store.outbox_messages().await[0].status, OutboxStatus::Published);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let config = PublisherConfig {
            max_attempts: 2,
            ..PublisherConfig::default()
        };
        let (store, distributor, publisher) = setup(&["alice"], config).await;
        distributor.fail_next(5);

        publisher.publish_batch().await.unwrap();
        let report = publisher.publish_batch().await.unwrap();
        assert_eq!(report.gave_up, 1);

        let row = &store.outbox_messages().await[0];
        assert_eq!(row.status, OutboxStatus::Failed);
        assert_eq!(row.attempts, 2);

        // Parked rows are not claimed again
        let report = publisher.publish_batch().await.unwrap();
        assert_eq!(report, BatchReport::default());
    }

    #[tokio::test]
    async fn test_batch_size_limits_claim() {
        let config = PublisherConfig {
            batch_size: 1,
            ..PublisherConfig::default()
        };
        let (_store, distributor, publisher) = setup(&["alice", "bob", "carol"], config).await;

        assert_eq!(publisher.publish_batch().await.unwrap().published, 1);
        assert_eq!(publisher.publish_batch().await.unwrap().published, 1);
        assert_eq!(distributor.delivered().len(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let config = PublisherConfig {
            poll_interval: Duration::from_millis(5),
            ..PublisherConfig::default()
        };
        let (store, _distributor, publisher) = setup(&["alice"], config).await;
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { publisher.run(rx).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(store.outbox_messages().await[0].status, OutboxStatus::Published);
    }
}

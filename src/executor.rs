//! Transaction Executor
//!
//! Runs one unit of work inside one store transaction: commit on `Ok`,
//! rollback on `Err`. The unit's error is returned as-is.
//!
//! The executor never retries. Contention surfaces as a
//! [`ErrorKind::Conflict`](crate::error::ErrorKind::Conflict) error and the
//! caller decides whether to re-run the whole operation, typically through
//! [`retry_on_conflict`].

use futures::future::BoxFuture;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::{SettlementError, StoreContext};
use crate::store::{Store, StoreTx};

/// Unit-of-work runner bound to one store
pub struct TxExecutor<S: Store> {
    store: Arc<S>,
}

impl<S: Store> TxExecutor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run `f` in a fresh transaction.
    ///
    /// `f` borrows the transaction for the duration of its future, so it may
    /// only capture owned data:
    ///
    /// ```ignore
    /// let order = executor
    ///     .exec_tx("load_order", move |tx| Box::pin(async move {
    ///         tx.get_order(order_id).await.context("failed to load order")
    ///     }))
    ///     .await?;
    /// ```
    pub async fn exec_tx<T, F>(&self, op: &'static str, f: F) -> Result<T, SettlementError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, Result<T, SettlementError>> + Send,
    {
        let mut tx = self
            .store
            .begin()
            .await
            .context("failed to begin transaction")?;

        match f(&mut tx).await {
            Ok(value) => {
                tx.commit()
                    .await
                    .context("failed to commit transaction")?;
                debug!(op, store = self.store.name(), "Transaction committed");
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    error!(op, error = %e, rollback_error = %rb, "Rollback failed");
                }
                warn!(op, code = e.code(), error = %e, "Transaction rolled back");
                Err(e)
            }
        }
    }
}

/// Caller-side retry policy for [`retry_on_conflict`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with up to 50% added jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
        let delay = exp.min(self.max_delay);
        let jitter_ms = (delay.as_millis() / 2) as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Re-run `op` while it fails with a Conflict, up to `policy.max_attempts`.
///
/// Only for operations that are safe to repeat as a whole. Any other error,
/// or the last Conflict, is returned unchanged.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, SettlementError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SettlementError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Conflict, retrying unit of work"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

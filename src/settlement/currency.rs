//! Currency-availability check run before order placement

use tracing::debug;

use super::SettlementService;
use crate::core_types::UserId;
use crate::error::{SettlementError, StoreContext};
use crate::store::{Store, StoreTx};

impl<S: Store> SettlementService<S> {
    /// Ok only if `user_id` holds a wallet in both currencies.
    ///
    /// Read-only; runs in a transaction for a consistent snapshot.
    pub async fn check_currency_availability(
        &self,
        user_id: UserId,
        base_currency: String,
        quote_currency: String,
    ) -> Result<(), SettlementError> {
        self.executor
            .exec_tx("check_currency_availability", move |tx| {
                Box::pin(async move {
                    let wallets = tx
                        .list_user_wallets(user_id)
                        .await
                        .context("failed to list wallets")?;

                    for currency in [base_currency, quote_currency] {
                        if !wallets.iter().any(|w| w.currency == currency) {
                            return Err(SettlementError::CurrencyUnavailable { user_id, currency });
                        }
                    }
                    Ok(())
                })
            })
            .await?;

        debug!(user_id = %user_id, "Currencies available");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_both_currencies_present() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", "alice@example.com").await;
        store.seed_wallet(user.id, "BTC", Decimal::ZERO).await;
        store.seed_wallet(user.id, "USD", Decimal::ZERO).await;
        let service = SettlementService::new(store);

        service
            .check_currency_availability(user.id, "BTC".into(), "USD".into())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_currency_fails_closed() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("alice", "alice@example.com").await;
        let other = store.seed_user("bob", "bob@example.com").await;
        store.seed_wallet(user.id, "BTC", Decimal::ZERO).await;
        store.seed_wallet(other.id, "USD", Decimal::ZERO).await;
        let service = SettlementService::new(store);

        let err = service
            .check_currency_availability(user.id, "BTC".into(), "USD".into())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err,
            SettlementError::CurrencyUnavailable {
                user_id: user.id,
                currency: "USD".into()
            }
        );
    }
}

//! Transaction (Ledger) Posting
//!
//! Writes a deposit/withdrawal ledger row and its fee row in one
//! transaction. Posting records intent only; wallet balances are moved by
//! whatever completes the external transfer.

use rust_decimal::Decimal;
use tracing::info;

use super::SettlementService;
use crate::core_types::LedgerEntryId;
use crate::error::{SettlementError, StoreContext};
use crate::models::{
    FeeParams, LedgerEntry, NewLedgerEntry, PostTransactionParams, PostedTransaction,
    TransactionStatus, TransactionType,
};
use crate::store::{Store, StoreTx};

impl<S: Store> SettlementService<S> {
    pub async fn post_transaction(
        &self,
        params: PostTransactionParams,
        fee: FeeParams,
    ) -> Result<PostedTransaction, SettlementError> {
        if params.amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount(format!(
                "{} amount must be positive, got {}",
                params.tx_type, params.amount
            )));
        }
        if fee.maker_fee < Decimal::ZERO || fee.taker_fee < Decimal::ZERO {
            return Err(SettlementError::InvalidAmount(format!(
                "fee rates must not be negative, got maker {} taker {}",
                fee.maker_fee, fee.taker_fee
            )));
        }

        let sizing = self.sizing.clone();
        let posted = self
            .executor
            .exec_tx("post_transaction", move |tx| {
                Box::pin(async move {
                    let amount = match params.tx_type {
                        TransactionType::Deposit => params.amount,
                        TransactionType::Withdrawal => {
                            sizing.posted_amount(&mut *tx, &params).await?
                        }
                    };
                    if amount < Decimal::ZERO {
                        return Err(SettlementError::InvalidAmount(format!(
                            "posted {} amount {} is negative (requested {})",
                            params.tx_type, amount, params.amount
                        )));
                    }

                    let entry = tx
                        .insert_ledger_entry(&NewLedgerEntry {
                            user_id: params.user_id,
                            tx_type: params.tx_type,
                            currency: params.currency,
                            requested_amount: params.amount,
                            amount,
                            status: params.status,
                            address: params.address,
                            tx_hash: params.tx_hash,
                        })
                        .await
                        .context("failed to create transaction")?;
                    let fee = tx.insert_fee(&fee).await.context("failed to create fee")?;

                    Ok(PostedTransaction { entry, fee })
                })
            })
            .await?;

        info!(
            entry_id = %posted.entry.id,
            user_id = %posted.entry.user_id,
            tx_type = %posted.entry.tx_type,
            currency = %posted.entry.currency,
            requested = %posted.entry.requested_amount,
            posted = %posted.entry.amount,
            sizing = self.sizing.name(),
            "Transaction posted"
        );
        Ok(posted)
    }

    /// Move a ledger entry out of `pending`
    pub async fn update_ledger_status(
        &self,
        id: LedgerEntryId,
        status: TransactionStatus,
    ) -> Result<LedgerEntry, SettlementError> {
        let entry = self
            .executor
            .exec_tx("update_ledger_status", move |tx| {
                Box::pin(async move {
                    let entry = tx
                        .lock_ledger_entry(id)
                        .await
                        .context("failed to load transaction")?;
                    if !entry.status.can_transition_to(status) {
                        return Err(SettlementError::illegal_transition(entry.status, status));
                    }
                    tx.update_ledger_status(id, status)
                        .await
                        .context("failed to update transaction status")
                })
            })
            .await?;

        info!(entry_id = %id, status = %status, "Transaction status updated");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::settlement::AccountBalanceSizing;
    use crate::store::{FaultPoint, MemoryStore};
    use crate::error::StoreError;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use uuid::Uuid;

    fn params(user_id: Uuid, tx_type: TransactionType, amount: Decimal) -> PostTransactionParams {
        PostTransactionParams {
            user_id,
            tx_type,
            currency: "USD".into(),
            amount,
            status: TransactionStatus::Pending,
            address: Some("bc1qexample".into()),
            tx_hash: None,
        }
    }

    fn fee(market_id: Uuid) -> FeeParams {
        FeeParams {
            market_id,
            maker_fee: dec!(0.001),
            taker_fee: dec!(0.002),
        }
    }

    #[tokio::test]
    async fn test_deposit_posts_requested_amount() {
        let store = Arc::new(MemoryStore::new());
        let market = store.seed_market("BTC", "USD").await;
        let user = store.seed_user("alice", "alice@example.com").await;
        let service = SettlementService::new(store.clone());

        let posted = service
            .post_transaction(params(user.id, TransactionType::Deposit, dec!(25)), fee(market.id))
            .await
            .unwrap();

        assert_eq!(posted.entry.amount, dec!(25));
        assert_eq!(posted.entry.requested_amount, dec!(25));
        assert_eq!(posted.fee.taker_fee, dec!(0.002));
        assert_eq!(store.ledger_entries().await.len(), 1);
        assert_eq!(store.fees().await.len(), 1);
    }

    #[tokio::test]
    async fn test_withdrawal_uses_global_max_balance() {
        let store = Arc::new(MemoryStore::new());
        let market = store.seed_market("BTC", "USD").await;
        let user = store.seed_user("alice", "alice@example.com").await;
        let other = store.seed_user("bob", "bob@example.com").await;
        store.seed_wallet(user.id, "USD", dec!(100)).await;
        store.seed_wallet(other.id, "USD", dec!(1000)).await;
        let service = SettlementService::new(store.clone());

        let posted = service
            .post_transaction(
                params(user.id, TransactionType::Withdrawal, dec!(30)),
                fee(market.id),
            )
            .await
            .unwrap();

        // Global max (1000) minus requested (30); not the caller's balance.
        assert_eq!(posted.entry.amount, dec!(970));
        assert_eq!(posted.entry.requested_amount, dec!(30));
        assert_eq!(service.sizing_policy(), "global_max_balance");
    }

    #[tokio::test]
    async fn test_withdrawal_with_account_sizing() {
        let store = Arc::new(MemoryStore::new());
        let market = store.seed_market("BTC", "USD").await;
        let user = store.seed_user("alice", "alice@example.com").await;
        store.seed_wallet(user.id, "USD", dec!(100)).await;
        let service =
            SettlementService::new(store.clone()).with_sizing(Arc::new(AccountBalanceSizing));

        let posted = service
            .post_transaction(
                params(user.id, TransactionType::Withdrawal, dec!(30)),
                fee(market.id),
            )
            .await
            .unwrap();
        assert_eq!(posted.entry.amount, dec!(30));

        let err = service
            .post_transaction(
                params(user.id, TransactionType::Withdrawal, dec!(300)),
                fee(market.id),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        assert_eq!(store.ledger_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_negative_posted_amount_rejected() {
        let store = Arc::new(MemoryStore::new());
        let market = store.seed_market("BTC", "USD").await;
        let user = store.seed_user("alice", "alice@example.com").await;
        store.seed_wallet(user.id, "USD", dec!(10)).await;
        let service = SettlementService::new(store.clone());

        let err = service
            .post_transaction(
                params(user.id, TransactionType::Withdrawal, dec!(30)),
                fee(market.id),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
        assert!(store.ledger_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_fee_failure_rolls_back_entry() {
        let store = Arc::new(MemoryStore::new());
        let market = store.seed_market("BTC", "USD").await;
        let user = store.seed_user("alice", "alice@example.com").await;
        store.inject_fault(FaultPoint::InsertFee, StoreError::Internal("disk full".into()));
        let service = SettlementService::new(store.clone());

        let err = service
            .post_transaction(params(user.id, TransactionType::Deposit, dec!(5)), fee(market.id))
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("failed to create fee"));
        assert!(store.ledger_entries().await.is_empty());
        assert!(store.fees().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_invalid_inputs() {
        let store = Arc::new(MemoryStore::new());
        let service = SettlementService::new(store.clone());
        let user = Uuid::new_v4();

        let err = service
            .post_transaction(params(user, TransactionType::Deposit, dec!(0)), fee(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");

        let mut negative_fee = fee(Uuid::new_v4());
        negative_fee.maker_fee = dec!(-0.1);
        let err = service
            .post_transaction(params(user, TransactionType::Deposit, dec!(1)), negative_fee)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");
        assert_eq!(store.commit_count() + store.rollback_count(), 0);
    }

    #[tokio::test]
    async fn test_ledger_status_transitions() {
        let store = Arc::new(MemoryStore::new());
        let market = store.seed_market("BTC", "USD").await;
        let user = store.seed_user("alice", "alice@example.com").await;
        let service = SettlementService::new(store.clone());
        let posted = service
            .post_transaction(params(user.id, TransactionType::Deposit, dec!(5)), fee(market.id))
            .await
            .unwrap();

        let entry = service
            .update_ledger_status(posted.entry.id, TransactionStatus::Completed)
            .await
            .unwrap();
        assert_eq!(entry.status, TransactionStatus::Completed);

        let err = service
            .update_ledger_status(posted.entry.id, TransactionStatus::Failed)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Illegal status transition: completed -> failed");
    }
}

//! Withdrawal sizing policies
//!
//! Decides the amount a withdrawal ledger entry is posted with. The policy
//! runs inside the posting transaction and may read through the same handle.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::{SettlementError, StoreContext};
use crate::models::PostTransactionParams;
use crate::store::StoreTx;

#[async_trait]
pub trait WithdrawalSizing<T: StoreTx + 'static>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Amount to post for a withdrawal of `params.amount`
    async fn posted_amount(
        &self,
        tx: &mut T,
        params: &PostTransactionParams,
    ) -> Result<Decimal, SettlementError>;
}

/// Posts `(largest wallet balance in the whole system) - requested`.
///
/// Default for compatibility with existing ledgers. This does not look at
/// the withdrawing account at all and is a known defect; prefer
/// [`AccountBalanceSizing`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalMaxBalanceSizing;

#[async_trait]
impl<T: StoreTx + 'static> WithdrawalSizing<T> for GlobalMaxBalanceSizing {
    fn name(&self) -> &'static str {
        "global_max_balance"
    }

    async fn posted_amount(
        &self,
        tx: &mut T,
        params: &PostTransactionParams,
    ) -> Result<Decimal, SettlementError> {
        let largest = tx
            .list_wallets_by_balance_desc(1)
            .await
            .context("failed to list wallets")?;
        let max_balance = largest.first().map(|w| w.balance).unwrap_or(Decimal::ZERO);
        max_balance.checked_sub(params.amount).ok_or_else(|| {
            SettlementError::InvalidAmount(format!(
                "withdrawal of {} against {} overflows",
                params.amount, max_balance
            ))
        })
    }
}

/// Posts the requested amount after checking the acting account's own wallet
/// in that currency can cover it.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountBalanceSizing;

#[async_trait]
impl<T: StoreTx + 'static> WithdrawalSizing<T> for AccountBalanceSizing {
    fn name(&self) -> &'static str {
        "account_balance"
    }

    async fn posted_amount(
        &self,
        tx: &mut T,
        params: &PostTransactionParams,
    ) -> Result<Decimal, SettlementError> {
        let wallet = tx
            .find_wallet(params.user_id, &params.currency)
            .await
            .context("failed to load withdrawal wallet")?;
        let wallet = tx
            .lock_wallet(wallet.id)
            .await
            .context("failed to lock withdrawal wallet")?;

        if wallet.balance < params.amount {
            return Err(SettlementError::InsufficientBalance {
                wallet_id: wallet.id,
                balance: wallet.balance,
                required: params.amount,
            });
        }
        Ok(params.amount)
    }
}

//! Order Fill Update
//!
//! The order row is read `FOR UPDATE`, so two concurrent partial fills on the
//! same order serialize and the second one sees the first one's
//! `filled_amount`.

use rust_decimal::Decimal;
use tracing::info;

use super::SettlementService;
use crate::error::{SettlementError, StoreContext};
use crate::models::{Order, OrderFillParams, OrderStatus};
use crate::store::{Store, StoreTx};

impl<S: Store> SettlementService<S> {
    /// Persist a new status and filled amount; returns the applied filled amount
    pub async fn update_order_fill(
        &self,
        params: OrderFillParams,
    ) -> Result<Decimal, SettlementError> {
        let order_id = params.order_id;
        let status = params.status;

        let order = self
            .executor
            .exec_tx("update_order_fill", move |tx| {
                Box::pin(async move {
                    let order = tx
                        .lock_order(params.order_id)
                        .await
                        .context("failed to load order")?;
                    check_fill(&order, &params)?;
                    tx.update_order_fill(order.id, params.status, params.filled_amount)
                        .await
                        .context("failed to update order")
                })
            })
            .await?;

        info!(
            order_id = %order_id,
            status = %status,
            filled_amount = %order.filled_amount,
            remaining = %order.remaining(),
            "Order fill updated"
        );
        Ok(order.filled_amount)
    }
}

/// Reject a fill update that moves backwards, overfills, crosses an illegal
/// status edge or leaves the status disagreeing with the filled amount.
/// Runs against the locked row.
pub(crate) fn check_fill(order: &Order, params: &OrderFillParams) -> Result<(), SettlementError> {
    if !order.status.can_transition_to(params.status) {
        return Err(SettlementError::illegal_transition(
            order.status,
            params.status,
        ));
    }
    if params.filled_amount < order.filled_amount {
        return Err(SettlementError::FillDecrease {
            order_id: order.id,
            current: order.filled_amount,
            requested: params.filled_amount,
        });
    }
    if params.filled_amount > order.amount {
        return Err(SettlementError::FillExceedsAmount {
            order_id: order.id,
            amount: order.amount,
            requested: params.filled_amount,
        });
    }
    match params.status {
        OrderStatus::Open if !params.filled_amount.is_zero() => {
            Err(SettlementError::InvalidAmount(format!(
                "order {} cannot stay open with {} filled",
                order.id, params.filled_amount
            )))
        }
        OrderStatus::PartiallyFilled if params.filled_amount.is_zero() => {
            Err(SettlementError::InvalidAmount(format!(
                "order {} marked partially filled with nothing filled",
                order.id
            )))
        }
        OrderStatus::Filled if params.filled_amount != order.amount => {
            Err(SettlementError::InvalidAmount(format!(
                "order {} marked filled at {} of {}",
                order.id, params.filled_amount, order.amount
            )))
        }
        _ => Ok(()),
    }
}

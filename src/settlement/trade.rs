//! Trade Settlement
//!
//! Applies one executed trade to the buyer's and seller's quote-currency
//! wallets:
//!
//! ```text
//! total  = price * quantity
//! buyer  -= total + fee
//! seller += total - fee
//! ```
//!
//! Locked balances are not touched.
//!
//! # Lock order
//!
//! Both wallet ids are resolved without locks first, then locked in
//! ascending id order. Every settlement touching the same pair therefore
//! acquires the same row first, so two trades in opposite directions cannot
//! deadlock each other.

use rust_decimal::Decimal;
use tracing::info;

use super::SettlementService;
use crate::error::{SettlementError, StoreContext};
use crate::models::{NewTrade, OrderSide, SettleTradeParams, TradeSettlement, Wallet};
use crate::store::{Store, StoreTx};

impl<S: Store> SettlementService<S> {
    pub async fn settle_trade(
        &self,
        params: SettleTradeParams,
    ) -> Result<TradeSettlement, SettlementError> {
        validate_trade(&params)?;

        let settlement = self
            .executor
            .exec_tx("settle_trade", move |tx| {
                Box::pin(async move { settle_in_tx(tx, params).await })
            })
            .await?;

        info!(
            trade_id = %settlement.trade.id,
            market_id = %settlement.trade.market_id,
            price = %settlement.trade.price,
            amount = %settlement.trade.amount,
            fee = %settlement.trade.fee,
            buyer_wallet = %settlement.buyer_wallet.id,
            seller_wallet = %settlement.seller_wallet.id,
            "Trade settled"
        );
        Ok(settlement)
    }
}

fn validate_trade(params: &SettleTradeParams) -> Result<(), SettlementError> {
    if params.price <= Decimal::ZERO {
        return Err(SettlementError::InvalidAmount(format!(
            "trade price must be positive, got {}",
            params.price
        )));
    }
    if params.quantity <= Decimal::ZERO {
        return Err(SettlementError::InvalidAmount(format!(
            "trade quantity must be positive, got {}",
            params.quantity
        )));
    }
    if params.fee < Decimal::ZERO {
        return Err(SettlementError::InvalidAmount(format!(
            "trade fee must not be negative, got {}",
            params.fee
        )));
    }
    Ok(())
}

/// Buyer and seller deltas for a trade; `None` when the amounts overflow
fn trade_deltas(price: Decimal, quantity: Decimal, fee: Decimal) -> Option<(Decimal, Decimal)> {
    let total = price.checked_mul(quantity)?;
    let buyer_delta = -(total.checked_add(fee)?);
    let seller_delta = total.checked_sub(fee)?;
    Some((buyer_delta, seller_delta))
}

/// New balance after applying `delta`, rejecting a negative result
fn apply_delta(wallet: &Wallet, delta: Decimal) -> Result<Decimal, SettlementError> {
    let balance = wallet.balance.checked_add(delta).ok_or_else(|| {
        SettlementError::InvalidAmount(format!(
            "balance of wallet {} overflows applying {}",
            wallet.id, delta
        ))
    })?;
    if balance < Decimal::ZERO {
        return Err(SettlementError::InsufficientBalance {
            wallet_id: wallet.id,
            balance: wallet.balance,
            required: -delta,
        });
    }
    Ok(balance)
}

async fn settle_in_tx<T: StoreTx>(
    tx: &mut T,
    params: SettleTradeParams,
) -> Result<TradeSettlement, SettlementError> {
    let (buyer_delta, seller_delta) = trade_deltas(params.price, params.quantity, params.fee)
        .ok_or_else(|| {
            SettlementError::InvalidAmount(format!(
                "trade value overflows: price {} quantity {} fee {}",
                params.price, params.quantity, params.fee
            ))
        })?;

    let buy = tx
        .get_order(params.buy_order_id)
        .await
        .context("failed to load buy order")?;
    let sell = tx
        .get_order(params.sell_order_id)
        .await
        .context("failed to load sell order")?;

    if buy.market_id != params.market_id || sell.market_id != params.market_id {
        return Err(SettlementError::MarketMismatch(format!(
            "trade on market {} references orders on {} and {}",
            params.market_id, buy.market_id, sell.market_id
        )));
    }
    if buy.side != OrderSide::Buy {
        return Err(SettlementError::SideMismatch(format!(
            "buy order {} is a {} order",
            buy.id, buy.side
        )));
    }
    if sell.side != OrderSide::Sell {
        return Err(SettlementError::SideMismatch(format!(
            "sell order {} is a {} order",
            sell.id, sell.side
        )));
    }

    let market = tx
        .get_market(params.market_id)
        .await
        .context("failed to load market")?;
    let currency = market.quote_currency;

    // Resolve both ids before any lock so a missing wallet fails first
    let buyer_id = tx
        .find_wallet(buy.user_id, &currency)
        .await
        .context("failed to load buyer wallet")?
        .id;
    let seller_id = tx
        .find_wallet(sell.user_id, &currency)
        .await
        .context("failed to load seller wallet")?
        .id;


    let new_trade = NewTrade {
        buy_order_id: params.buy_order_id,
        sell_order_id: params.sell_order_id,
        market_id: params.market_id,
        price: params.price,
        amount: params.quantity,
        fee: params.fee,
    };

    if buyer_id == seller_id {
        // Self-trade: one row, net delta
        let wallet = tx
            .lock_wallet(buyer_id)
            .await
            .context("failed to lock wallet")?;
        let net = buyer_delta.checked_add(seller_delta).ok_or_else(|| {
            SettlementError::InvalidAmount(format!("self-trade on wallet {} overflows", wallet.id))
        })?;
        let balance = apply_delta(&wallet, net)?;

        let trade = tx
            .insert_trade(&new_trade)
            .await
            .context("failed to create trade")?;
        let wallet = tx
            .update_wallet_balance(wallet.id, balance, wallet.locked_balance)
            .await
            .context("failed to update buyer wallet")?;

        return Ok(TradeSettlement {
            trade,
            buyer_wallet: wallet.clone(),
            seller_wallet: wallet,
        });
    }

    let (first, second) = if buyer_id < seller_id {
        (buyer_id, seller_id)
    } else {
        (seller_id, buyer_id)
    };
    let first = tx
        .lock_wallet(first)
        .await
        .context("failed to lock wallet")?;
    let second = tx
        .lock_wallet(second)
        .await
        .context("failed to lock wallet")?;
    let (buyer, seller) = if first.id == buyer_id {
        (first, second)
    } else {
        (second, first)
    };

    let buyer_balance = apply_delta(&buyer, buyer_delta)?;
    let seller_balance = apply_delta(&seller, seller_delta)?;

    let trade = tx
        .insert_trade(&new_trade)
        .await
        .context("failed to create trade")?;

    let buyer_wallet = tx
        .update_wallet_balance(buyer.id, buyer_balance, buyer.locked_balance)
        .await
        .context("failed to update buyer wallet")?;
    let seller_wallet = tx
        .update_wallet_balance(seller.id, seller_balance, seller.locked_balance)
        .await
        .context("failed to update seller wallet")?;

    Ok(TradeSettlement {
        trade,
        buyer_wallet,
        seller_wallet,
    })
}

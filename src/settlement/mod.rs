//! Settlement Operations
//!
//! Multi-step financial mutations, each applied all-or-nothing through one
//! [`TxExecutor`] call:
//!
//! | Operation | Module |
//! |---|---|
//! | [`SettlementService::settle_trade`] | `trade` |
//! | [`SettlementService::update_order_fill`] | `order_fill` |
//! | [`SettlementService::post_transaction`] / [`SettlementService::update_ledger_status`] | `ledger` |
//! | [`SettlementService::create_user`] / [`SettlementService::verify_email`] | `user` |
//! | [`SettlementService::check_currency_availability`] | `currency` |
//!
//! Inputs are already validated and parsed by the caller. Invariant checks
//! happen before the first write of a unit of work.

mod currency;
mod ledger;
mod order_fill;
pub mod sizing;
mod trade;
mod user;

pub use sizing::{AccountBalanceSizing, GlobalMaxBalanceSizing, WithdrawalSizing};

use std::sync::Arc;

use crate::executor::TxExecutor;
use crate::outbox::task::TaskOptions;
use crate::store::Store;

/// Entry point for all settlement operations over one store
pub struct SettlementService<S: Store> {
    executor: Arc<TxExecutor<S>>,
    sizing: Arc<dyn WithdrawalSizing<S::Tx>>,
    verify_email_task: TaskOptions,
}

impl<S: Store> Clone for SettlementService<S> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            sizing: self.sizing.clone(),
            verify_email_task: self.verify_email_task.clone(),
        }
    }
}

impl<S: Store> SettlementService<S> {
    /// Service with the default (global max balance) withdrawal sizing
    pub fn new(store: Arc<S>) -> Self {
        Self {
            executor: Arc::new(TxExecutor::new(store)),
            sizing: Arc::new(GlobalMaxBalanceSizing),
            verify_email_task: TaskOptions::default(),
        }
    }

    pub fn with_sizing(mut self, sizing: Arc<dyn WithdrawalSizing<S::Tx>>) -> Self {
        self.sizing = sizing;
        self
    }

    pub fn with_verify_email_task(mut self, options: TaskOptions) -> Self {
        self.verify_email_task = options;
        self
    }

    pub fn executor(&self) -> &Arc<TxExecutor<S>> {
        &self.executor
    }

    pub fn sizing_policy(&self) -> &'static str {
        self.sizing.name()
    }
}

//! Venue Settlement - atomic financial mutations for a trading venue
//!
//! Every multi-step change to wallets, orders and the ledger runs as one
//! store transaction and either commits completely or not at all.
//!
//! # Modules
//!
//! - [`core_types`] - Identifier aliases (UserId, WalletId, OrderId, ...)
//! - [`models`] - Wallet, Order, Trade, LedgerEntry, User, OutboxMessage
//! - [`error`] - Error taxonomy (NotFound / AlreadyExists / InvariantViolation / Conflict / Internal)
//! - [`store`] - Store / StoreTx traits, PostgreSQL and in-memory backends
//! - [`db`] - Connection pool and schema bootstrap
//! - [`executor`] - Transaction executor and caller-side conflict retry
//! - [`settlement`] - Trade settlement, order fills, ledger posting, users
//! - [`outbox`] - Transactional outbox and task-queue publisher
//! - [`config`] / [`logging`] - Service configuration and tracing setup

// Core types - must be first!
pub mod core_types;

pub mod error;
pub mod models;
pub mod store;

pub mod executor;
pub mod outbox;
pub mod settlement;

pub mod config;
pub mod db;
pub mod logging;

// Convenient re-exports at crate root
pub use core_types::{
    FeeId, LedgerEntryId, MarketId, OrderId, OutboxId, TradeId, UserId, VerifyEmailId, WalletId,
};
pub use error::{ErrorKind, SettlementError, StoreContext, StoreError};
pub use executor::{RetryPolicy, TxExecutor, retry_on_conflict};
pub use models::{
    Order, OrderFillParams, OrderSide, OrderStatus, PostTransactionParams, SettleTradeParams,
    Trade, TradeSettlement, TransactionStatus, TransactionType, Wallet,
};
pub use settlement::{
    AccountBalanceSizing, GlobalMaxBalanceSizing, SettlementService, WithdrawalSizing,
};
pub use store::{MemoryStore, PgStore, Store, StoreTx};

//! Relational Store Interface
//!
//! The settlement layer consumes the store through two traits:
//! - [`Store`]: opens transactions.
//! - [`StoreTx`]: transaction-scoped point queries. Every mutation of a
//!   wallet or order happens through a `StoreTx`; there is no
//!   non-transactional mutation path.
//!
//! Implementations classify their native failures into [`StoreError`] so
//! callers never inspect driver error codes.
//!
//! # Locking
//!
//! `lock_*` methods take a row lock (`SELECT ... FOR UPDATE`) held until the
//! transaction ends. `get_*` / `find_*` methods read without locking.

pub mod memory;
pub mod postgres;

pub use memory::{FaultPoint, MemoryStore};
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::core_types::{LedgerEntryId, MarketId, OrderId, OutboxId, UserId, VerifyEmailId, WalletId};
use crate::error::StoreError;
use crate::models::{
    FeeParams, FeeSchedule, LedgerEntry, Market, NewLedgerEntry, NewOutboxMessage, NewTrade,
    NewUser, Order, OrderStatus, OutboxMessage, Trade, TransactionStatus, User, VerifyEmail,
    Wallet,
};

/// Transaction factory
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: StoreTx + 'static;

    /// Backend name for logging
    fn name(&self) -> &'static str;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// Transaction-scoped query handle
#[async_trait]
pub trait StoreTx: Send {
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;

    // === Orders ===

    async fn get_order(&mut self, id: OrderId) -> Result<Order, StoreError>;

    async fn lock_order(&mut self, id: OrderId) -> Result<Order, StoreError>;

    async fn update_order_fill(
        &mut self,
        id: OrderId,
        status: OrderStatus,
        filled_amount: Decimal,
    ) -> Result<Order, StoreError>;

    // === Markets / fees ===

    async fn get_market(&mut self, id: MarketId) -> Result<Market, StoreError>;

    async fn insert_fee(&mut self, fee: &FeeParams) -> Result<FeeSchedule, StoreError>;

    // === Wallets ===

    async fn find_wallet(&mut self, user_id: UserId, currency: &str) -> Result<Wallet, StoreError>;

    async fn lock_wallet(&mut self, id: WalletId) -> Result<Wallet, StoreError>;

    async fn update_wallet_balance(
        &mut self,
        id: WalletId,
        balance: Decimal,
        locked_balance: Decimal,
    ) -> Result<Wallet, StoreError>;

    async fn list_user_wallets(&mut self, user_id: UserId) -> Result<Vec<Wallet>, StoreError>;

    /// All wallets in the system, largest balance first
    async fn list_wallets_by_balance_desc(&mut self, limit: i64)
    -> Result<Vec<Wallet>, StoreError>;

    // === Trades ===

    async fn insert_trade(&mut self, trade: &NewTrade) -> Result<Trade, StoreError>;

    // === Ledger ===

    async fn insert_ledger_entry(&mut self, entry: &NewLedgerEntry)
    -> Result<LedgerEntry, StoreError>;

    async fn lock_ledger_entry(&mut self, id: LedgerEntryId) -> Result<LedgerEntry, StoreError>;

    async fn update_ledger_status(
        &mut self,
        id: LedgerEntryId,
        status: TransactionStatus,
    ) -> Result<LedgerEntry, StoreError>;

    // === Users ===

    async fn insert_user(&mut self, user: &NewUser) -> Result<User, StoreError>;

    /// Mark an unused, unexpired verification record as used.
    ///
    /// NotFound when no record matches (wrong id, wrong code, used, expired).
    async fn consume_verify_email(
        &mut self,
        id: VerifyEmailId,
        secret_code: &str,
    ) -> Result<VerifyEmail, StoreError>;

    async fn mark_user_verified(&mut self, username: &str) -> Result<User, StoreError>;

    // === Outbox ===

    async fn insert_outbox(&mut self, msg: &NewOutboxMessage) -> Result<OutboxMessage, StoreError>;

    /// Lock up to `limit` pending rows, oldest first, skipping rows another
    /// publisher already holds.
    async fn claim_pending_outbox(&mut self, limit: i64)
    -> Result<Vec<OutboxMessage>, StoreError>;

    async fn mark_outbox_published(&mut self, id: OutboxId) -> Result<(), StoreError>;

    /// Count a failed publish attempt; `give_up` moves the row to `failed`.
    async fn record_outbox_failure(
        &mut self,
        id: OutboxId,
        error: &str,
        give_up: bool,
    ) -> Result<(), StoreError>;
}

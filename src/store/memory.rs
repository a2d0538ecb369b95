//! In-Memory Store
//!
//! Transactional [`Store`] over plain collections. Used by the test suite
//! and for running the settlement layer without PostgreSQL.
//!
//! # Isolation
//!
//! A transaction holds the table mutex from `begin` until `commit` /
//! `rollback` and works on a private copy, so transactions are serialized
//! and a rollback simply discards the copy. This is stronger than the row
//! locks PostgreSQL takes, which is fine for a test double.
//!
//! # Fault injection
//!
//! [`MemoryStore::inject_fault`] queues a one-shot error at a named
//! [`FaultPoint`], which is how tests force a failure half-way through a
//! unit of work or simulate lock contention.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Store, StoreTx};
use crate::core_types::{
    LedgerEntryId, MarketId, OrderId, OutboxId, UserId, VerifyEmailId, WalletId,
};
use crate::error::StoreError;
use crate::models::{
    FeeParams, FeeSchedule, LedgerEntry, Market, NewLedgerEntry, NewOutboxMessage, NewTrade,
    NewUser, Order, OrderSide, OrderStatus, OutboxMessage, OutboxStatus, Trade, TransactionStatus,
    User, UserRole, VerifyEmail, Wallet,
};

/// Where an injected fault fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Begin,
    Commit,
    GetOrder,
    LockOrder,
    UpdateOrder,
    GetMarket,
    FindWallet,
    LockWallet,
    UpdateWallet,
    InsertTrade,
    InsertLedgerEntry,
    UpdateLedgerStatus,
    InsertFee,
    InsertUser,
    ConsumeVerifyEmail,
    MarkUserVerified,
    InsertOutbox,
    ClaimOutbox,
    UpdateOutbox,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    wallets: BTreeMap<WalletId, Wallet>,
    markets: BTreeMap<MarketId, Market>,
    orders: BTreeMap<OrderId, Order>,
    trades: Vec<Trade>,
    fees: Vec<FeeSchedule>,
    ledger: Vec<LedgerEntry>,
    verify_emails: BTreeMap<VerifyEmailId, VerifyEmail>,
    outbox: BTreeMap<OutboxId, OutboxMessage>,
    next_verify_id: VerifyEmailId,
    next_outbox_id: OutboxId,
}

impl Tables {
    fn wallet_mut(&mut self, id: WalletId) -> Result<&mut Wallet, StoreError> {
        self.wallets
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("wallet {id}")))
    }

    fn ledger_mut(&mut self, id: LedgerEntryId) -> Result<&mut LedgerEntry, StoreError> {
        self.ledger
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {id}")))
    }

    fn outbox_mut(&mut self, id: OutboxId) -> Result<&mut OutboxMessage, StoreError> {
        self.outbox
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("outbox message {id}")))
    }
}

struct Shared {
    tables: Arc<AsyncMutex<Tables>>,
    faults: Mutex<HashMap<FaultPoint, VecDeque<StoreError>>>,
    wallet_lock_trace: Mutex<Vec<WalletId>>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn check(&self, point: FaultPoint) -> Result<(), StoreError> {
        match lock(&self.faults).get_mut(&point).and_then(VecDeque::pop_front) {
            Some(err) => {
                tracing::debug!(?point, error = %err, "Injected store fault");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

/// In-memory transactional store
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let tables = Tables {
            next_verify_id: 1,
            next_outbox_id: 1,
            ..Tables::default()
        };
        Self {
            shared: Arc::new(Shared {
                tables: Arc::new(AsyncMutex::new(tables)),
                faults: Mutex::new(HashMap::new()),
                wallet_lock_trace: Mutex::new(Vec::new()),
                commits: AtomicUsize::new(0),
                rollbacks: AtomicUsize::new(0),
            }),
        }
    }

    // === Fault injection / tracing ===

    /// Fail the next operation at `point` with `err` (one-shot, FIFO)
    pub fn inject_fault(&self, point: FaultPoint, err: StoreError) {
        lock(&self.shared.faults)
            .entry(point)
            .or_default()
            .push_back(err);
    }

    /// Wallet ids in the order `lock_wallet` acquired them (committed or not)
    pub fn wallet_lock_trace(&self) -> Vec<WalletId> {
        lock(&self.shared.wallet_lock_trace).clone()
    }

    pub fn clear_wallet_lock_trace(&self) {
        lock(&self.shared.wallet_lock_trace).clear();
    }

    pub fn commit_count(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    // === Seeding (upstream CRUD stand-ins) ===

    pub async fn seed_user(&self, username: &str, email: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: String::new(),
            role: UserRole::User,
            is_verified: false,
            created_at: Utc::now(),
        };
        let mut tables = self.shared.tables.lock().await;
        tables.users.insert(user.id, user.clone());
        user
    }

    pub async fn seed_wallet(&self, user_id: UserId, currency: &str, balance: Decimal) -> Wallet {
        let wallet = Wallet {
            id: Uuid::new_v4(),
            user_id,
            currency: currency.to_string(),
            balance,
            locked_balance: Decimal::ZERO,
            created_at: Utc::now(),
        };
        let mut tables = self.shared.tables.lock().await;
        tables.wallets.insert(wallet.id, wallet.clone());
        wallet
    }

    pub async fn seed_market(&self, base: &str, quote: &str) -> Market {
        let market = Market {
            id: Uuid::new_v4(),
            base_currency: base.to_string(),
            quote_currency: quote.to_string(),
            min_order_amount: Decimal::ZERO,
            price_precision: 8,
            created_at: Utc::now(),
        };
        let mut tables = self.shared.tables.lock().await;
        tables.markets.insert(market.id, market.clone());
        market
    }

    pub async fn seed_order(
        &self,
        user_id: UserId,
        market_id: MarketId,
        side: OrderSide,
        price: Decimal,
        amount: Decimal,
    ) -> Order {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id,
            market_id,
            side,
            price,
            amount,
            filled_amount: Decimal::ZERO,
            status: OrderStatus::Open,
            created_at: now,
            updated_at: now,
        };
        let mut tables = self.shared.tables.lock().await;
        tables.orders.insert(order.id, order.clone());
        order
    }

    /// Verification record valid for `ttl` from now (negative = already expired)
    pub async fn seed_verify_email(&self, user: &User, secret_code: &str, ttl: Duration) -> VerifyEmail {
        let mut tables = self.shared.tables.lock().await;
        let now = Utc::now();
        let record = VerifyEmail {
            id: tables.next_verify_id,
            username: user.username.clone(),
            email: user.email.clone(),
            secret_code: secret_code.to_string(),
            is_used: false,
            created_at: now,
            expired_at: now + ttl,
        };
        tables.next_verify_id += 1;
        tables.verify_emails.insert(record.id, record.clone());
        record
    }

    // === Committed-state readers ===

    pub async fn wallet(&self, id: WalletId) -> Option<Wallet> {
        self.shared.tables.lock().await.wallets.get(&id).cloned()
    }

    pub async fn order(&self, id: OrderId) -> Option<Order> {
        self.shared.tables.lock().await.orders.get(&id).cloned()
    }

    pub async fn user(&self, id: UserId) -> Option<User> {
        self.shared.tables.lock().await.users.get(&id).cloned()
    }

    pub async fn verify_email(&self, id: VerifyEmailId) -> Option<VerifyEmail> {
        self.shared.tables.lock().await.verify_emails.get(&id).cloned()
    }

    pub async fn trades(&self) -> Vec<Trade> {
        self.shared.tables.lock().await.trades.clone()
    }

    pub async fn fees(&self) -> Vec<FeeSchedule> {
        self.shared.tables.lock().await.fees.clone()
    }

    pub async fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.shared.tables.lock().await.ledger.clone()
    }

    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.shared
            .tables
            .lock()
            .await
            .outbox
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        self.shared.check(FaultPoint::Begin)?;
        let guard = self.shared.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(MemoryTx {
            guard,
            work,
            shared: self.shared.clone(),
        })
    }
}

/// Open in-memory transaction
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
    shared: Arc<Shared>,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self) -> Result<(), StoreError> {
        let MemoryTx {
            mut guard,
            work,
            shared,
        } = self;
        if let Err(e) = shared.check(FaultPoint::Commit) {
            shared.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(e);
        }
        *guard = work;
        shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_order(&mut self, id: OrderId) -> Result<Order, StoreError> {
        self.shared.check(FaultPoint::GetOrder)?;
        self.work
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("order {id}")))
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Order, StoreError> {
        self.shared.check(FaultPoint::LockOrder)?;
        self.work
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("order {id}")))
    }

    async fn update_order_fill(
        &mut self,
        id: OrderId,
        status: OrderStatus,
        filled_amount: Decimal,
    ) -> Result<Order, StoreError> {
        self.shared.check(FaultPoint::UpdateOrder)?;
        let order = self
            .work
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;
        order.status = status;
        order.filled_amount = filled_amount;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn get_market(&mut self, id: MarketId) -> Result<Market, StoreError> {
        self.shared.check(FaultPoint::GetMarket)?;
        self.work
            .markets
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("market {id}")))
    }

    async fn insert_fee(&mut self, fee: &FeeParams) -> Result<FeeSchedule, StoreError> {
        self.shared.check(FaultPoint::InsertFee)?;
        let row = FeeSchedule {
            id: Uuid::new_v4(),
            market_id: fee.market_id,
            maker_fee: fee.maker_fee,
            taker_fee: fee.taker_fee,
            created_at: Utc::now(),
        };
        self.work.fees.push(row.clone());
        Ok(row)
    }

    async fn find_wallet(&mut self, user_id: UserId, currency: &str) -> Result<Wallet, StoreError> {
        self.shared.check(FaultPoint::FindWallet)?;
        self.work
            .wallets
            .values()
            .find(|w| w.user_id == user_id && w.currency == currency)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("wallet ({user_id}, {currency})")))
    }

    async fn lock_wallet(&mut self, id: WalletId) -> Result<Wallet, StoreError> {
        self.shared.check(FaultPoint::LockWallet)?;
        let wallet = self
            .work
            .wallets
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("wallet {id}")))?;
        lock(&self.shared.wallet_lock_trace).push(id);
        Ok(wallet)
    }

    async fn update_wallet_balance(
        &mut self,
        id: WalletId,
        balance: Decimal,
        locked_balance: Decimal,
    ) -> Result<Wallet, StoreError> {
        self.shared.check(FaultPoint::UpdateWallet)?;
        let wallet = self.work.wallet_mut(id)?;
        wallet.balance = balance;
        wallet.locked_balance = locked_balance;
        Ok(wallet.clone())
    }

    async fn list_user_wallets(&mut self, user_id: UserId) -> Result<Vec<Wallet>, StoreError> {
        self.shared.check(FaultPoint::FindWallet)?;
        let mut wallets: Vec<Wallet> = self
            .work
            .wallets
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        wallets.sort_by(|a, b| a.currency.cmp(&b.currency));
        Ok(wallets)
    }

    async fn list_wallets_by_balance_desc(
        &mut self,
        limit: i64,
    ) -> Result<Vec<Wallet>, StoreError> {
        self.shared.check(FaultPoint::FindWallet)?;
        let mut wallets: Vec<Wallet> = self.work.wallets.values().cloned().collect();
        wallets.sort_by(|a, b| b.balance.cmp(&a.balance).then(a.id.cmp(&b.id)));
        wallets.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(wallets)
    }

    async fn insert_trade(&mut self, trade: &NewTrade) -> Result<Trade, StoreError> {
        self.shared.check(FaultPoint::InsertTrade)?;
        let row = Trade {
            id: Uuid::new_v4(),
            buy_order_id: trade.buy_order_id,
            sell_order_id: trade.sell_order_id,
            market_id: trade.market_id,
            price: trade.price,
            amount: trade.amount,
            fee: trade.fee,
            created_at: Utc::now(),
        };
        self.work.trades.push(row.clone());
        Ok(row)
    }

    async fn insert_ledger_entry(
        &mut self,
        entry: &NewLedgerEntry,
    ) -> Result<LedgerEntry, StoreError> {
        self.shared.check(FaultPoint::InsertLedgerEntry)?;
        let row = LedgerEntry {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            tx_type: entry.tx_type,
            currency: entry.currency.clone(),
            requested_amount: entry.requested_amount,
            amount: entry.amount,
            status: entry.status,
            address: entry.address.clone(),
            tx_hash: entry.tx_hash.clone(),
            created_at: Utc::now(),
        };
        self.work.ledger.push(row.clone());
        Ok(row)
    }

    async fn lock_ledger_entry(&mut self, id: LedgerEntryId) -> Result<LedgerEntry, StoreError> {
        Ok(self.work.ledger_mut(id)?.clone())
    }

    async fn update_ledger_status(
        &mut self,
        id: LedgerEntryId,
        status: TransactionStatus,
    ) -> Result<LedgerEntry, StoreError> {
        self.shared.check(FaultPoint::UpdateLedgerStatus)?;
        let entry = self.work.ledger_mut(id)?;
        entry.status = status;
        Ok(entry.clone())
    }

    async fn insert_user(&mut self, user: &NewUser) -> Result<User, StoreError> {
        self.shared.check(FaultPoint::InsertUser)?;
        if self.work.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::AlreadyExists("users_username_key".to_string()));
        }
        if self.work.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::AlreadyExists("users_email_key".to_string()));
        }
        let row = User {
            id: Uuid::new_v4(),
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            role: user.role,
            is_verified: false,
            created_at: Utc::now(),
        };
        self.work.users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn consume_verify_email(
        &mut self,
        id: VerifyEmailId,
        secret_code: &str,
    ) -> Result<VerifyEmail, StoreError> {
        self.shared.check(FaultPoint::ConsumeVerifyEmail)?;
        let now = Utc::now();
        match self.work.verify_emails.get_mut(&id) {
            Some(record)
                if record.secret_code == secret_code && !record.is_used && record.expired_at > now =>
            {
                record.is_used = true;
                Ok(record.clone())
            }
            _ => Err(StoreError::NotFound(format!("pending verification {id}"))),
        }
    }

    async fn mark_user_verified(&mut self, username: &str) -> Result<User, StoreError> {
        self.shared.check(FaultPoint::MarkUserVerified)?;
        let user = self
            .work
            .users
            .values_mut()
            .find(|u| u.username == username)
            .ok_or_else(|| StoreError::NotFound(format!("user {username}")))?;
        user.is_verified = true;
        Ok(user.clone())
    }

    async fn insert_outbox(&mut self, msg: &NewOutboxMessage) -> Result<OutboxMessage, StoreError> {
        self.shared.check(FaultPoint::InsertOutbox)?;
        let row = OutboxMessage {
            id: self.work.next_outbox_id,
            task_type: msg.task_type.clone(),
            payload: msg.payload.clone(),
            queue: msg.queue.clone(),
            max_retry: msg.max_retry,
            delay_secs: msg.delay_secs,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            published_at: None,
        };
        self.work.next_outbox_id += 1;
        self.work.outbox.insert(row.id, row.clone());
        Ok(row)
    }

    async fn claim_pending_outbox(
        &mut self,
        limit: i64,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        self.shared.check(FaultPoint::ClaimOutbox)?;
        Ok(self
            .work
            .outbox
            .values()
            .filter(|m| m.status == OutboxStatus::Pending)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn mark_outbox_published(&mut self, id: OutboxId) -> Result<(), StoreError> {
        self.shared.check(FaultPoint::UpdateOutbox)?;
        let msg = self.work.outbox_mut(id)?;
        msg.status = OutboxStatus::Published;
        msg.published_at = Some(Utc::now());
        msg.last_error = None;
        Ok(())
    }

    async fn record_outbox_failure(
        &mut self,
        id: OutboxId,
        error: &str,
        give_up: bool,
    ) -> Result<(), StoreError> {
        self.shared.check(FaultPoint::UpdateOutbox)?;
        let msg = self.work.outbox_mut(id)?;
        msg.attempts += 1;
        msg.last_error = Some(error.to_string());
        if give_up {
            msg.status = OutboxStatus::Failed;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let user = store.seed_user("alice", "alice@example.com").await;
        let wallet = store.seed_wallet(user.id, "USD", Decimal::from(100)).await;

        let mut tx = store.begin().await.unwrap();
        tx.update_wallet_balance(wallet.id, Decimal::from(1), Decimal::ZERO)
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.wallet(wallet.id).await.unwrap().balance, Decimal::from(100));
        assert_eq!(store.rollback_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryStore::new();
        let user = store.seed_user("alice", "alice@example.com").await;
        let wallet = store.seed_wallet(user.id, "USD", Decimal::from(100)).await;

        let mut tx = store.begin().await.unwrap();
        tx.update_wallet_balance(wallet.id, Decimal::from(40), Decimal::from(2))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored = store.wallet(wallet.id).await.unwrap();
        assert_eq!(stored.balance, Decimal::from(40));
        assert_eq!(stored.locked_balance, Decimal::from(2));
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_fault_is_one_shot() {
        let store = MemoryStore::new();
        store.inject_fault(FaultPoint::GetMarket, StoreError::Conflict("40P01".into()));

        let mut tx = store.begin().await.unwrap();
        let first = tx.get_market(Uuid::new_v4()).await;
        assert_eq!(first, Err(StoreError::Conflict("40P01".into())));

        let second = tx.get_market(Uuid::new_v4()).await;
        assert!(matches!(second, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_commit_fault_rolls_back() {
        let store = MemoryStore::new();
        let user = store.seed_user("alice", "alice@example.com").await;
        let wallet = store.seed_wallet(user.id, "USD", Decimal::from(100)).await;
        store.inject_fault(FaultPoint::Commit, StoreError::Internal("connection reset".into()));

        let mut tx = store.begin().await.unwrap();
        tx.update_wallet_balance(wallet.id, Decimal::ZERO, Decimal::ZERO)
            .await
            .unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(store.wallet(wallet.id).await.unwrap().balance, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_duplicate_user_rejected() {
        let store = MemoryStore::new();
        let new_user = NewUser {
            username: "bob".into(),
            email: "bob@example.com".into(),
            password_hash: "hash".into(),
            role: UserRole::User,
        };

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(&new_user).await.unwrap();
        let dup = tx.insert_user(&new_user).await;
        assert!(matches!(dup, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_wallets_by_balance_desc() {
        let store = MemoryStore::new();
        let user = store.seed_user("alice", "alice@example.com").await;
        store.seed_wallet(user.id, "USD", Decimal::from(10)).await;
        store.seed_wallet(user.id, "BTC", Decimal::from(1000)).await;
        store.seed_wallet(user.id, "ETH", Decimal::from(50)).await;

        let mut tx = store.begin().await.unwrap();
        let wallets = tx.list_wallets_by_balance_desc(2).await.unwrap();
        assert_eq!(wallets.len(), 2);
        assert_eq!(wallets[0].balance, Decimal::from(1000));
        assert_eq!(wallets[1].balance, Decimal::from(50));
    }
}

// models.rs - Persistent entities touched by the settlement layer

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{
    FeeId, LedgerEntryId, MarketId, OrderId, OutboxId, TradeId, UserId, VerifyEmailId, WalletId,
};

// ============================================================
// ORDERS
// ============================================================

/// Order side: Buy or Sell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(OrderSide::Buy),
            "sell" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status
///
/// ```text
/// OPEN → PARTIALLY_FILLED → FILLED
///   ↓           ↓
/// CANCELLED ←───┘
/// ```
///
/// FILLED and CANCELLED are terminal. No edge re-enters OPEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    /// Whether a fill update may move an order from `self` to `next`.
    ///
    /// A non-terminal status may be re-applied (successive partial fills keep
    /// the order in PARTIALLY_FILLED). Terminal statuses accept nothing.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Open, Open) | (PartiallyFilled, PartiallyFilled) => true,
            (Open, PartiallyFilled) | (Open, Cancelled) => true,
            (PartiallyFilled, Filled) | (PartiallyFilled, Cancelled) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "open" => Some(OrderStatus::Open),
            "partially_filled" => Some(OrderStatus::PartiallyFilled),
            "filled" => Some(OrderStatus::Filled),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resting order. Created upstream, mutated only by fill updates.
///
/// Invariant: `0 <= filled_amount <= amount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub market_id: MarketId,
    pub side: OrderSide,
    pub price: Decimal,
    pub amount: Decimal,
    pub filled_amount: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[inline]
    pub fn remaining(&self) -> Decimal {
        self.amount - self.filled_amount
    }
}

/// Input to an order fill update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFillParams {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub filled_amount: Decimal,
}

// ============================================================
// MARKETS / FEES
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub base_currency: String,
    pub quote_currency: String,
    pub min_order_amount: Decimal,
    pub price_precision: i32,
    pub created_at: DateTime<Utc>,
}

/// Per-market maker/taker rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub id: FeeId,
    pub market_id: MarketId,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Fee row written alongside a ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeParams {
    pub market_id: MarketId,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
}

// ============================================================
// WALLETS / TRADES
// ============================================================

/// Balance holder for one (owner, currency) pair.
///
/// `balance` and `locked_balance` are never negative after a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub currency: String,
    pub balance: Decimal,
    pub locked_balance: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Executed trade. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub market_id: MarketId,
    pub price: Decimal,
    pub amount: Decimal,
    pub fee: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Input to trade settlement. The match decision was made out-of-band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettleTradeParams {
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub market_id: MarketId,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
}

/// Trade row as inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub market_id: MarketId,
    pub price: Decimal,
    pub amount: Decimal,
    pub fee: Decimal,
}

/// Result of a committed settlement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeSettlement {
    pub trade: Trade,
    pub buyer_wallet: Wallet,
    pub seller_wallet: Wallet,
}

// ============================================================
// LEDGER (deposits / withdrawals)
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionType::Deposit),
            "withdrawal" => Some(TransactionType::Withdrawal),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger entry status: `pending → completed | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (TransactionStatus::Pending, TransactionStatus::Completed)
                | (TransactionStatus::Pending, TransactionStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Posted deposit or withdrawal.
///
/// `requested_amount` is what the caller asked for; `amount` is what the
/// withdrawal sizing policy posted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub user_id: UserId,
    pub tx_type: TransactionType,
    pub currency: String,
    pub requested_amount: Decimal,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub address: Option<String>,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Caller input for transaction posting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostTransactionParams {
    pub user_id: UserId,
    pub tx_type: TransactionType,
    pub currency: String,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub address: Option<String>,
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub user_id: UserId,
    pub tx_type: TransactionType,
    pub currency: String,
    pub requested_amount: Decimal,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub address: Option<String>,
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostedTransaction {
    pub entry: LedgerEntry,
    pub fee: FeeSchedule,
}

// ============================================================
// USERS / EMAIL VERIFICATION
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::User => "user",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(UserRole::Admin),
            "user" => Some(UserRole::User),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Already-validated, already-hashed registration input
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
}

/// One-shot email verification code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyEmail {
    pub id: VerifyEmailId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub secret_code: String,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedEmail {
    pub user: User,
    pub verify_email: VerifyEmail,
}

// ============================================================
// OUTBOX
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Published,
    /// Gave up after `max_attempts` distributor failures
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "published" => Some(OutboxStatus::Published),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

/// Intent-to-enqueue row, written in the same transaction as its trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: OutboxId,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub queue: String,
    pub max_retry: i32,
    pub delay_secs: i64,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxMessage {
    pub task_type: String,
    pub payload: serde_json::Value,
    pub queue: String,
    pub max_retry: i32,
    pub delay_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedUser {
    pub user: User,
    pub outbox_id: OutboxId,
}

//! Core types used throughout the system
//!
//! Identifier aliases shared by the models, the store layer and the
//! settlement operations.

use uuid::Uuid;

/// User ID - globally unique, immutable after assignment.
pub type UserId = Uuid;

/// Wallet ID - one wallet per (owner, currency).
///
/// # Lock ordering
/// Wallet ids are the sort key for row-lock acquisition: any operation that
/// locks more than one wallet MUST lock them in ascending `WalletId` order.
pub type WalletId = Uuid;

/// Order ID - unique within the system
pub type OrderId = Uuid;

/// Market ID - a base/quote trading pair
pub type MarketId = Uuid;

/// Trade ID - unique within the system
pub type TradeId = Uuid;

/// Ledger entry (deposit / withdrawal) ID
pub type LedgerEntryId = Uuid;

/// Fee schedule row ID
pub type FeeId = Uuid;

/// Email verification record ID (database sequence)
pub type VerifyEmailId = i64;

/// Outbox row ID (database sequence, defines publish order)
pub type OutboxId = i64;

//! Settlement Error Types
//!
//! Two layers:
//! - [`StoreError`]: a store failure already classified as NotFound /
//!   AlreadyExists / Conflict / Internal. Settlement code never looks at raw
//!   driver error codes.
//! - [`SettlementError`]: what a settlement operation returns. Callers map
//!   [`SettlementError::kind`] to transport-specific status codes.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::core_types::{OrderId, UserId, WalletId};

/// Error taxonomy exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced wallet, order, user or record does not exist
    NotFound,
    /// Unique key already taken (username, email, ...)
    AlreadyExists,
    /// Operation would break a balance, fill or status invariant
    InvariantViolation,
    /// Lock / serialization contention. Transient.
    Conflict,
    /// Connectivity or unclassified failure
    Internal,
}

impl ErrorKind {
    /// Only contention is worth re-running the whole unit of work for
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Conflict)
    }
}

/// Classified store failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("duplicate key: {0}")]
    AlreadyExists(String),

    #[error("lock or serialization conflict: {0}")]
    Conflict(String),

    #[error("store failure: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Settlement error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    // === Invariant Violations ===
    #[error("Insufficient balance in wallet {wallet_id}: balance {balance}, required {required}")]
    InsufficientBalance {
        wallet_id: WalletId,
        balance: Decimal,
        required: Decimal,
    },

    #[error("Filled amount of order {order_id} cannot decrease ({current} -> {requested})")]
    FillDecrease {
        order_id: OrderId,
        current: Decimal,
        requested: Decimal,
    },

    #[error("Filled amount of order {order_id} exceeds order amount ({requested} > {amount})")]
    FillExceedsAmount {
        order_id: OrderId,
        amount: Decimal,
        requested: Decimal,
    },

    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Market mismatch: {0}")]
    MarketMismatch(String),

    #[error("Order side mismatch: {0}")]
    SideMismatch(String),

    // === Not Found ===
    #[error("User {user_id} has no wallet for currency {currency}")]
    CurrencyUnavailable { user_id: UserId, currency: String },

    // === Store ===
    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettlementError::InsufficientBalance { .. }
            | SettlementError::FillDecrease { .. }
            | SettlementError::FillExceedsAmount { .. }
            | SettlementError::IllegalTransition { .. }
            | SettlementError::InvalidAmount(_)
            | SettlementError::MarketMismatch(_)
            | SettlementError::SideMismatch(_) => ErrorKind::InvariantViolation,
            SettlementError::CurrencyUnavailable { .. } => ErrorKind::NotFound,
            SettlementError::Store { source, .. } => source.kind(),
            SettlementError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            SettlementError::FillDecrease { .. } => "FILL_DECREASE",
            SettlementError::FillExceedsAmount { .. } => "FILL_EXCEEDS_AMOUNT",
            SettlementError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            SettlementError::InvalidAmount(_) => "INVALID_AMOUNT",
            SettlementError::MarketMismatch(_) => "MARKET_MISMATCH",
            SettlementError::SideMismatch(_) => "SIDE_MISMATCH",
            SettlementError::CurrencyUnavailable { .. } => "CURRENCY_UNAVAILABLE",
            SettlementError::Store { source, .. } => match source {
                StoreError::NotFound(_) => "NOT_FOUND",
                StoreError::AlreadyExists(_) => "ALREADY_EXISTS",
                StoreError::Conflict(_) => "CONFLICT",
                StoreError::Internal(_) => "STORE_ERROR",
            },
            SettlementError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    #[inline]
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn illegal_transition(from: impl ToString, to: impl ToString) -> Self {
        SettlementError::IllegalTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Attach the failing step to a store error.
///
/// ```
/// use venue_settlement::error::{ErrorKind, StoreContext, StoreError};
///
/// let res: Result<(), StoreError> = Err(StoreError::Conflict("deadlock detected".into()));
/// let err = res.context("failed to update buyer wallet").unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::Conflict);
/// assert!(err.to_string().starts_with("failed to update buyer wallet"));
/// ```
pub trait StoreContext<T> {
    fn context(self, context: &'static str) -> Result<T, SettlementError>;
}

impl<T> StoreContext<T> for Result<T, StoreError> {
    fn context(self, context: &'static str) -> Result<T, SettlementError> {
        self.map_err(|source| SettlementError::Store { context, source })
    }
}

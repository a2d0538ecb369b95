//! PostgreSQL Store
//!
//! sqlx-backed [`Store`]. Row locks are `SELECT ... FOR UPDATE`; the outbox
//! claim uses `FOR UPDATE SKIP LOCKED` so several publishers can drain the
//! table concurrently.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::{Store, StoreTx};
use crate::core_types::{LedgerEntryId, MarketId, OrderId, OutboxId, UserId, VerifyEmailId, WalletId};
use crate::error::{ErrorKind, StoreError};
use crate::models::{
    FeeParams, FeeSchedule, LedgerEntry, Market, NewLedgerEntry, NewOutboxMessage, NewTrade,
    NewUser, Order, OrderSide, OrderStatus, OutboxMessage, OutboxStatus, Trade, TransactionStatus,
    TransactionType, User, UserRole, VerifyEmail, Wallet,
};

const ORDER_COLUMNS: &str =
    "id, user_id, market_id, side, price, amount, filled_amount, status, created_at, updated_at";
const WALLET_COLUMNS: &str = "id, user_id, currency, balance, locked_balance, created_at";
const MARKET_COLUMNS: &str =
    "id, base_currency, quote_currency, min_order_amount, price_precision, created_at";
const TRADE_COLUMNS: &str =
    "id, buy_order_id, sell_order_id, market_id, price, amount, fee, created_at";
const FEE_COLUMNS: &str = "id, market_id, maker_fee, taker_fee, created_at";
const LEDGER_COLUMNS: &str = "id, user_id, type, currency, requested_amount, amount, status, \
                              address, tx_hash, created_at";
const USER_COLUMNS: &str = "id, username, email, password_hash, role, is_verified, created_at";
const VERIFY_EMAIL_COLUMNS: &str =
    "id, username, email, secret_code, is_used, created_at, expired_at";
const OUTBOX_COLUMNS: &str = "id, task_type, payload, queue, max_retry, delay_secs, status, \
                              attempts, last_error, created_at, published_at";

/// Map a PostgreSQL SQLSTATE onto the error taxonomy.
///
/// - `40001` serialization_failure, `40P01` deadlock_detected,
///   `55P03` lock_not_available: Conflict
/// - `23505` unique_violation: AlreadyExists
pub fn classify_sqlstate(code: &str) -> ErrorKind {
    match code {
        "40001" | "40P01" | "55P03" => ErrorKind::Conflict,
        "23505" => ErrorKind::AlreadyExists,
        _ => ErrorKind::Internal,
    }
}

/// Classify a driver error. `what` names the row for NotFound messages.
pub fn classify(err: sqlx::Error, what: &str) -> StoreError {
    match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound(what.to_string()),
        sqlx::Error::Database(db) => {
            let code = db.code();
            match code.as_deref().map(classify_sqlstate) {
                Some(ErrorKind::Conflict) => StoreError::Conflict(db.message().to_string()),
                Some(ErrorKind::AlreadyExists) => StoreError::AlreadyExists(
                    db.constraint().unwrap_or(db.message()).to_string(),
                ),
                _ => {
                    tracing::error!(code = ?code, error = %err, "Unclassified database error");
                    StoreError::Internal(err.to_string())
                }
            }
        }
        _ => {
            tracing::error!(error = %err, "Store failure");
            StoreError::Internal(err.to_string())
        }
    }
}

fn col<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Internal(format!("failed to read column '{}': {}", column, e)))
}

fn parse_enum<T>(value: String, column: &str, parse: fn(&str) -> Option<T>) -> Result<T, StoreError> {
    parse(&value)
        .ok_or_else(|| StoreError::Internal(format!("invalid {} value: {}", column, value)))
}

fn row_to_order(row: &PgRow) -> Result<Order, StoreError> {
    Ok(Order {
        id: col(row, "id")?,
        user_id: col(row, "user_id")?,
        market_id: col(row, "market_id")?,
        side: parse_enum(col(row, "side")?, "side", OrderSide::from_db)?,
        price: col(row, "price")?,
        amount: col(row, "amount")?,
        filled_amount: col(row, "filled_amount")?,
        status: parse_enum(col(row, "status")?, "status", OrderStatus::from_db)?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

fn row_to_wallet(row: &PgRow) -> Result<Wallet, StoreError> {
    Ok(Wallet {
        id: col(row, "id")?,
        user_id: col(row, "user_id")?,
        currency: col(row, "currency")?,
        balance: col(row, "balance")?,
        locked_balance: col(row, "locked_balance")?,
        created_at: col(row, "created_at")?,
    })
}

fn row_to_market(row: &PgRow) -> Result<Market, StoreError> {
    Ok(Market {
        id: col(row, "id")?,
        base_currency: col(row, "base_currency")?,
        quote_currency: col(row, "quote_currency")?,
        min_order_amount: col(row, "min_order_amount")?,
        price_precision: col(row, "price_precision")?,
        created_at: col(row, "created_at")?,
    })
}

fn row_to_trade(row: &PgRow) -> Result<Trade, StoreError> {
    Ok(Trade {
        id: col(row, "id")?,
        buy_order_id: col(row, "buy_order_id")?,
        sell_order_id: col(row, "sell_order_id")?,
        market_id: col(row, "market_id")?,
        price: col(row, "price")?,
        amount: col(row, "amount")?,
        fee: col(row, "fee")?,
        created_at: col(row, "created_at")?,
    })
}

fn row_to_fee(row: &PgRow) -> Result<FeeSchedule, StoreError> {
    Ok(FeeSchedule {
        id: col(row, "id")?,
        market_id: col(row, "market_id")?,
        maker_fee: col(row, "maker_fee")?,
        taker_fee: col(row, "taker_fee")?,
        created_at: col(row, "created_at")?,
    })
}

fn row_to_ledger(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    Ok(LedgerEntry {
        id: col(row, "id")?,
        user_id: col(row, "user_id")?,
        tx_type: parse_enum(col(row, "type")?, "type", TransactionType::from_db)?,
        currency: col(row, "currency")?,
        requested_amount: col(row, "requested_amount")?,
        amount: col(row, "amount")?,
        status: parse_enum(col(row, "status")?, "status", TransactionStatus::from_db)?,
        address: col(row, "address")?,
        tx_hash: col(row, "tx_hash")?,
        created_at: col(row, "created_at")?,
    })
}

fn row_to_user(row: &PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: col(row, "id")?,
        username: col(row, "username")?,
        email: col(row, "email")?,
        password_hash: col(row, "password_hash")?,
        role: parse_enum(col(row, "role")?, "role", UserRole::from_db)?,
        is_verified: col(row, "is_verified")?,
        created_at: col(row, "created_at")?,
    })
}

fn row_to_verify_email(row: &PgRow) -> Result<VerifyEmail, StoreError> {
    Ok(VerifyEmail {
        id: col(row, "id")?,
        username: col(row, "username")?,
        email: col(row, "email")?,
        secret_code: col(row, "secret_code")?,
        is_used: col(row, "is_used")?,
        created_at: col(row, "created_at")?,
        expired_at: col(row, "expired_at")?,
    })
}

fn row_to_outbox(row: &PgRow) -> Result<OutboxMessage, StoreError> {
    Ok(OutboxMessage {
        id: col(row, "id")?,
        task_type: col(row, "task_type")?,
        payload: col(row, "payload")?,
        queue: col(row, "queue")?,
        max_retry: col(row, "max_retry")?,
        delay_secs: col(row, "delay_secs")?,
        status: parse_enum(col(row, "status")?, "status", OutboxStatus::from_db)?,
        attempts: col(row, "attempts")?,
        last_error: col(row, "last_error")?,
        created_at: col(row, "created_at")?,
        published_at: col(row, "published_at")?,
    })
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| classify(e, "transaction"))?;
        Ok(PgTx { tx })
    }
}

/// Open PostgreSQL transaction
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn fetch_one_as<T>(
        &mut self,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
        what: String,
        map: fn(&PgRow) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        match query.fetch_optional(&mut *self.tx).await {
            Ok(Some(row)) => map(&row),
            Ok(None) => Err(StoreError::NotFound(what)),
            Err(e) => Err(classify(e, &what)),
        }
    }

    async fn fetch_all_as<T>(
        &mut self,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
        what: &str,
        map: fn(&PgRow) -> Result<T, StoreError>,
    ) -> Result<Vec<T>, StoreError> {
        let rows = query
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| classify(e, what))?;
        rows.iter().map(map).collect()
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| classify(e, "commit"))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(|e| classify(e, "rollback"))
    }

    async fn get_order(&mut self, id: OrderId) -> Result<Order, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        self.fetch_one_as(sqlx::query(&sql).bind(id), format!("order {id}"), row_to_order)
            .await
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Order, StoreError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        self.fetch_one_as(sqlx::query(&sql).bind(id), format!("order {id}"), row_to_order)
            .await
    }

    async fn update_order_fill(
        &mut self,
        id: OrderId,
        status: OrderStatus,
        filled_amount: Decimal,
    ) -> Result<Order, StoreError> {
        let sql = format!(
            "UPDATE orders SET status = $2, filled_amount = $3, updated_at = NOW() \
             WHERE id = $1 RETURNING {ORDER_COLUMNS}"
        );
        let query = sqlx::query(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(filled_amount);
        self.fetch_one_as(query, format!("order {id}"), row_to_order)
            .await
    }

    async fn get_market(&mut self, id: MarketId) -> Result<Market, StoreError> {
        let sql = format!("SELECT {MARKET_COLUMNS} FROM markets WHERE id = $1");
        self.fetch_one_as(sqlx::query(&sql).bind(id), format!("market {id}"), row_to_market)
            .await
    }

    async fn insert_fee(&mut self, fee: &FeeParams) -> Result<FeeSchedule, StoreError> {
        let sql = format!(
            "INSERT INTO fees (id, market_id, maker_fee, taker_fee) \
             VALUES ($1, $2, $3, $4) RETURNING {FEE_COLUMNS}"
        );
        let query = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(fee.market_id)
            .bind(fee.maker_fee)
            .bind(fee.taker_fee);
        self.fetch_one_as(query, "fee".to_string(), row_to_fee).await
    }

    async fn find_wallet(&mut self, user_id: UserId, currency: &str) -> Result<Wallet, StoreError> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 AND currency = $2");
        let query = sqlx::query(&sql).bind(user_id).bind(currency);
        self.fetch_one_as(
            query,
            format!("wallet ({user_id}, {currency})"),
            row_to_wallet,
        )
        .await
    }

    async fn lock_wallet(&mut self, id: WalletId) -> Result<Wallet, StoreError> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1 FOR UPDATE");
        self.fetch_one_as(sqlx::query(&sql).bind(id), format!("wallet {id}"), row_to_wallet)
            .await
    }

    async fn update_wallet_balance(
        &mut self,
        id: WalletId,
        balance: Decimal,
        locked_balance: Decimal,
    ) -> Result<Wallet, StoreError> {
        let sql = format!(
            "UPDATE wallets SET balance = $2, locked_balance = $3 \
             WHERE id = $1 RETURNING {WALLET_COLUMNS}"
        );
        let query = sqlx::query(&sql)
            .bind(id)
            .bind(balance)
            .bind(locked_balance);
        self.fetch_one_as(query, format!("wallet {id}"), row_to_wallet)
            .await
    }

    async fn list_user_wallets(&mut self, user_id: UserId) -> Result<Vec<Wallet>, StoreError> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 ORDER BY currency");
        self.fetch_all_as(sqlx::query(&sql).bind(user_id), "wallets", row_to_wallet)
            .await
    }

    async fn list_wallets_by_balance_desc(
        &mut self,
        limit: i64,
    ) -> Result<Vec<Wallet>, StoreError> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets ORDER BY balance DESC, id LIMIT $1");
        self.fetch_all_as(sqlx::query(&sql).bind(limit), "wallets", row_to_wallet)
            .await
    }

    async fn insert_trade(&mut self, trade: &NewTrade) -> Result<Trade, StoreError> {
        let sql = format!(
            "INSERT INTO trades (id, buy_order_id, sell_order_id, market_id, price, amount, fee) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {TRADE_COLUMNS}"
        );
        let query = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(trade.buy_order_id)
            .bind(trade.sell_order_id)
            .bind(trade.market_id)
            .bind(trade.price)
            .bind(trade.amount)
            .bind(trade.fee);
        self.fetch_one_as(query, "trade".to_string(), row_to_trade)
            .await
    }

    async fn insert_ledger_entry(
        &mut self,
        entry: &NewLedgerEntry,
    ) -> Result<LedgerEntry, StoreError> {
        let sql = format!(
            "INSERT INTO transactions \
                 (id, user_id, type, currency, requested_amount, amount, status, address, tx_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {LEDGER_COLUMNS}"
        );
        let query = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(entry.user_id)
            .bind(entry.tx_type.as_str())
            .bind(&entry.currency)
            .bind(entry.requested_amount)
            .bind(entry.amount)
            .bind(entry.status.as_str())
            .bind(&entry.address)
            .bind(&entry.tx_hash);
        self.fetch_one_as(query, "transaction".to_string(), row_to_ledger)
            .await
    }

    async fn lock_ledger_entry(&mut self, id: LedgerEntryId) -> Result<LedgerEntry, StoreError> {
        let sql = format!("SELECT {LEDGER_COLUMNS} FROM transactions WHERE id = $1 FOR UPDATE");
        self.fetch_one_as(
            sqlx::query(&sql).bind(id),
            format!("transaction {id}"),
            row_to_ledger,
        )
        .await
    }

    async fn update_ledger_status(
        &mut self,
        id: LedgerEntryId,
        status: TransactionStatus,
    ) -> Result<LedgerEntry, StoreError> {
        let sql = format!(
            "UPDATE transactions SET status = $2 WHERE id = $1 RETURNING {LEDGER_COLUMNS}"
        );
        let query = sqlx::query(&sql).bind(id).bind(status.as_str());
        self.fetch_one_as(query, format!("transaction {id}"), row_to_ledger)
            .await
    }

    async fn insert_user(&mut self, user: &NewUser) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users (id, username, email, password_hash, role) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        );
        let query = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role.as_str());
        self.fetch_one_as(query, format!("user {}", user.username), row_to_user)
            .await
    }

    async fn consume_verify_email(
        &mut self,
        id: VerifyEmailId,
        secret_code: &str,
    ) -> Result<VerifyEmail, StoreError> {
        let sql = format!(
            "UPDATE verify_emails SET is_used = TRUE \
             WHERE id = $1 AND secret_code = $2 AND is_used = FALSE AND expired_at > NOW() \
             RETURNING {VERIFY_EMAIL_COLUMNS}"
        );
        let query = sqlx::query(&sql).bind(id).bind(secret_code);
        self.fetch_one_as(
            query,
            format!("pending verification {id}"),
            row_to_verify_email,
        )
        .await
    }

    async fn mark_user_verified(&mut self, username: &str) -> Result<User, StoreError> {
        let sql = format!(
            "UPDATE users SET is_verified = TRUE WHERE username = $1 RETURNING {USER_COLUMNS}"
        );
        self.fetch_one_as(
            sqlx::query(&sql).bind(username),
            format!("user {username}"),
            row_to_user,
        )
        .await
    }

    async fn insert_outbox(&mut self, msg: &NewOutboxMessage) -> Result<OutboxMessage, StoreError> {
        let sql = format!(
            "INSERT INTO outbox_messages (task_type, payload, queue, max_retry, delay_secs) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {OUTBOX_COLUMNS}"
        );
        let query = sqlx::query(&sql)
            .bind(&msg.task_type)
            .bind(&msg.payload)
            .bind(&msg.queue)
            .bind(msg.max_retry)
            .bind(msg.delay_secs);
        self.fetch_one_as(query, "outbox message".to_string(), row_to_outbox)
            .await
    }

    async fn claim_pending_outbox(
        &mut self,
        limit: i64,
    ) -> Result<Vec<OutboxMessage>, StoreError> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_messages WHERE status = 'pending' \
             ORDER BY id LIMIT $1 FOR UPDATE SKIP LOCKED"
        );
        self.fetch_all_as(sqlx::query(&sql).bind(limit), "outbox messages", row_to_outbox)
            .await
    }

    async fn mark_outbox_published(&mut self, id: OutboxId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE outbox_messages SET status = 'published', published_at = NOW(), \
             last_error = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| classify(e, "outbox message"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("outbox message {id}")));
        }
        Ok(())
    }

    async fn record_outbox_failure(
        &mut self,
        id: OutboxId,
        error: &str,
        give_up: bool,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE outbox_messages SET attempts = attempts + 1, last_error = $2, \
             status = CASE WHEN $3 THEN 'failed' ELSE status END WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(give_up)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| classify(e, "outbox message"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("outbox message {id}")));
        }
        Ok(())
    }
}

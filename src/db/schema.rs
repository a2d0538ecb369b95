use sqlx::PgPool;

/// Create the settlement tables if they do not exist.
///
/// CHECK constraints mirror the in-process invariants so a bug that slips
/// past them still cannot commit a negative balance or an overfilled order.
pub async fn init_schema(pool: &PgPool) -> anyhow::Result<()> {
    tracing::info!("Initializing PostgreSQL schema...");

    for (name, ddl) in TABLES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", name, e))?;
    }

    tracing::info!("PostgreSQL schema ready ({} tables)", TABLES.len());
    Ok(())
}

const TABLES: &[(&str, &str)] = &[
    ("users", CREATE_USERS_TABLE),
    ("verify_emails", CREATE_VERIFY_EMAILS_TABLE),
    ("markets", CREATE_MARKETS_TABLE),
    ("fees", CREATE_FEES_TABLE),
    ("wallets", CREATE_WALLETS_TABLE),
    ("orders", CREATE_ORDERS_TABLE),
    ("trades", CREATE_TRADES_TABLE),
    ("transactions", CREATE_TRANSACTIONS_TABLE),
    ("outbox_messages", CREATE_OUTBOX_TABLE),
    ("outbox_messages_pending_idx", CREATE_OUTBOX_PENDING_INDEX),
];

const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id UUID PRIMARY KEY,
    username VARCHAR(64) NOT NULL UNIQUE,
    email VARCHAR(255) NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role VARCHAR(16) NOT NULL DEFAULT 'user' CHECK (role IN ('admin', 'user')),
    is_verified BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_VERIFY_EMAILS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS verify_emails (
    id BIGSERIAL PRIMARY KEY,
    username VARCHAR(64) NOT NULL REFERENCES users (username),
    email VARCHAR(255) NOT NULL,
    secret_code VARCHAR(64) NOT NULL,
    is_used BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    expired_at TIMESTAMPTZ NOT NULL DEFAULT (NOW() + INTERVAL '15 minutes')
)
"#;

const CREATE_MARKETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS markets (
    id UUID PRIMARY KEY,
    base_currency VARCHAR(16) NOT NULL,
    quote_currency VARCHAR(16) NOT NULL,
    min_order_amount NUMERIC NOT NULL DEFAULT 0 CHECK (min_order_amount >= 0),
    price_precision INT NOT NULL DEFAULT 8,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (base_currency, quote_currency)
)
"#;

const CREATE_FEES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS fees (
    id UUID PRIMARY KEY,
    market_id UUID NOT NULL REFERENCES markets (id),
    maker_fee NUMERIC NOT NULL CHECK (maker_fee >= 0),
    taker_fee NUMERIC NOT NULL CHECK (taker_fee >= 0),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_WALLETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users (id),
    currency VARCHAR(16) NOT NULL,
    balance NUMERIC NOT NULL DEFAULT 0 CHECK (balance >= 0),
    locked_balance NUMERIC NOT NULL DEFAULT 0 CHECK (locked_balance >= 0),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (user_id, currency)
)
"#;

const CREATE_ORDERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users (id),
    market_id UUID NOT NULL REFERENCES markets (id),
    side VARCHAR(8) NOT NULL CHECK (side IN ('buy', 'sell')),
    price NUMERIC NOT NULL CHECK (price > 0),
    amount NUMERIC NOT NULL CHECK (amount > 0),
    filled_amount NUMERIC NOT NULL DEFAULT 0
        CHECK (filled_amount >= 0 AND filled_amount <= amount),
    status VARCHAR(20) NOT NULL DEFAULT 'open'
        CHECK (status IN ('open', 'partially_filled', 'filled', 'cancelled')),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TRADES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    id UUID PRIMARY KEY,
    buy_order_id UUID NOT NULL REFERENCES orders (id),
    sell_order_id UUID NOT NULL REFERENCES orders (id),
    market_id UUID NOT NULL REFERENCES markets (id),
    price NUMERIC NOT NULL CHECK (price > 0),
    amount NUMERIC NOT NULL CHECK (amount > 0),
    fee NUMERIC NOT NULL DEFAULT 0 CHECK (fee >= 0),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users (id),
    type VARCHAR(16) NOT NULL CHECK (type IN ('deposit', 'withdrawal')),
    currency VARCHAR(16) NOT NULL,
    requested_amount NUMERIC NOT NULL CHECK (requested_amount > 0),
    amount NUMERIC NOT NULL CHECK (amount >= 0),
    status VARCHAR(16) NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'completed', 'failed')),
    address TEXT,
    tx_hash TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_OUTBOX_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS outbox_messages (
    id BIGSERIAL PRIMARY KEY,
    task_type VARCHAR(64) NOT NULL,
    payload JSONB NOT NULL,
    queue VARCHAR(32) NOT NULL,
    max_retry INT NOT NULL,
    delay_secs BIGINT NOT NULL DEFAULT 0,
    status VARCHAR(16) NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'published', 'failed')),
    attempts INT NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    published_at TIMESTAMPTZ
)
"#;

const CREATE_OUTBOX_PENDING_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS outbox_messages_pending_idx
    ON outbox_messages (id) WHERE status = 'pending'
"#;

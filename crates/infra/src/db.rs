//! Postgres connection and schema bootstrap.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// Idempotent schema, applied at startup.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue_items (
    id            UUID PRIMARY KEY,
    item_type     TEXT NOT NULL,
    payload       JSONB NOT NULL,
    priority      INTEGER NOT NULL DEFAULT 0,
    status        TEXT NOT NULL CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    attempts      INTEGER NOT NULL DEFAULT 0 CHECK (attempts >= 0),
    max_attempts  INTEGER NOT NULL CHECK (max_attempts >= 1),
    process_at    TIMESTAMPTZ NOT NULL,
    last_error    TEXT,
    created_at    TIMESTAMPTZ NOT NULL,
    updated_at    TIMESTAMPTZ NOT NULL,
    claimed_at    TIMESTAMPTZ,
    processed_at  TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS queue_items_dispatch_idx
    ON queue_items (priority DESC, created_at ASC)
    WHERE status = 'pending';

CREATE INDEX IF NOT EXISTS queue_items_status_idx ON queue_items (status, processed_at);

CREATE TABLE IF NOT EXISTS conversations (
    id                 TEXT PRIMARY KEY,
    customer_id        TEXT NOT NULL,
    status             TEXT NOT NULL CHECK (status IN ('active', 'escalated', 'resolved', 'closed')),
    human_took_over    BOOLEAN NOT NULL DEFAULT FALSE,
    human_takeover_at  TIMESTAMPTZ,
    assigned_to        TEXT,
    created_at         TIMESTAMPTZ NOT NULL,
    updated_at         TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id               UUID PRIMARY KEY,
    conversation_id  TEXT NOT NULL REFERENCES conversations (id),
    external_id      TEXT,
    direction        TEXT NOT NULL,
    sender           TEXT NOT NULL,
    content          TEXT NOT NULL,
    created_at       TIMESTAMPTZ NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS messages_external_id_idx
    ON messages (conversation_id, external_id)
    WHERE external_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS sentiment_analyses (
    id                   UUID PRIMARY KEY,
    conversation_id      TEXT NOT NULL REFERENCES conversations (id),
    message_external_id  TEXT,
    score                DOUBLE PRECISION NOT NULL CHECK (score BETWEEN -1 AND 1),
    label                TEXT NOT NULL,
    created_at           TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS escalations (
    id               UUID PRIMARY KEY,
    conversation_id  TEXT NOT NULL REFERENCES conversations (id),
    reason           TEXT NOT NULL,
    previous_status  TEXT NOT NULL,
    next_status      TEXT NOT NULL,
    confidence       DOUBLE PRECISION,
    sentiment        DOUBLE PRECISION,
    created_at       TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS escalations_conversation_idx ON escalations (conversation_id, created_at);
"#;

/// Connect and make sure the schema exists.
pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    migrate(&pool).await?;
    info!("database schema ready");
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

// ABOUTME: SQLite bootstrap for the share-token data layer
// ABOUTME: Provides pool creation, schema initialization, and the shared StorageError type

use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Open (or create) the SQLite database at `path` and run schema setup.
pub async fn connect(path: &Path) -> Result<SqlitePool, StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let database_url = format!("sqlite://{}?mode=rwc", path.display());
    debug!("Connecting to share-token database: {}", database_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// In-memory database for tests and ephemeral use.
///
/// Capped at a single connection: each SQLite in-memory connection is its
/// own database, so a larger pool would hand out empty databases.
pub async fn connect_in_memory() -> Result<SqlitePool, StorageError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create the share-token tables and indexes. Idempotent.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    debug!("Initializing share-token schema");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS share_tokens (
            token TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            permissions TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            usage_limit INTEGER,
            usage_count INTEGER NOT NULL DEFAULT 0,
            ip_restrictions TEXT,
            password_protected INTEGER NOT NULL DEFAULT 0,
            password_hash TEXT,
            created_by TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_share_tokens_document ON share_tokens(document_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_share_tokens_expires ON share_tokens(expires_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS share_token_usage (
            id TEXT PRIMARY KEY,
            token TEXT NOT NULL,
            used_at INTEGER NOT NULL,
            ip_address TEXT NOT NULL,
            user_agent TEXT,
            action TEXT NOT NULL,
            user_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_share_token_usage_token ON share_token_usage(token)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_share_token_usage_used_at ON share_token_usage(used_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS share_audit_events (
            id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            token TEXT NOT NULL,
            document_id TEXT NOT NULL,
            actor TEXT,
            ip_address TEXT,
            detail TEXT,
            occurred_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_share_audit_events_token ON share_audit_events(token)",
    )
    .execute(pool)
    .await?;

    debug!("Share-token schema ready");
    Ok(())
}

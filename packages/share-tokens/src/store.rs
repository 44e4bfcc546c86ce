// ABOUTME: Persistence seam for share tokens and the audit trail
// ABOUTME: TokenStore/AuditSink traits with SQLite implementations over a SqlitePool

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use sendoff_storage::StorageError;

use crate::types::{AuditEvent, ShareAction, SharePermission, ShareToken, ShareTokenUsage};

/// Result of the store's conditional usage increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// Counter advanced; the use may proceed.
    Incremented,
    /// The usage limit was already reached (possibly by a concurrent use).
    LimitReached,
    /// The token is past expiry; dead tokens are never mutated.
    Expired,
    NotFound,
}

/// Durable store for share tokens.
///
/// `atomic_increment_usage` must be a single compare-and-increment in the
/// backing store: check-then-write in the caller would let concurrent
/// presentations exceed the usage limit.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: &ShareToken) -> Result<(), StorageError>;

    async fn get(&self, token: &str) -> Result<Option<ShareToken>, StorageError>;

    async fn get_by_document(&self, document_id: &str) -> Result<Vec<ShareToken>, StorageError>;

    async fn get_expired(&self, now: DateTime<Utc>) -> Result<Vec<ShareToken>, StorageError>;

    /// Delete a token record. Returns whether a record existed.
    async fn delete(&self, token: &str) -> Result<bool, StorageError>;

    async fn atomic_increment_usage(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<IncrementOutcome, StorageError>;

    async fn insert_usage(&self, usage: &ShareTokenUsage) -> Result<(), StorageError>;

    async fn get_usage(&self, token: &str) -> Result<Vec<ShareTokenUsage>, StorageError>;
}

/// Compliance event consumer. Fire-and-forget from the caller's view:
/// sink failures are logged, never folded into validation outcomes.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), StorageError>;
}

/// SQLite-backed token store.
pub struct SqliteTokenStore {
    pool: SqlitePool,
}

impl SqliteTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn insert(&self, token: &ShareToken) -> Result<(), StorageError> {
        debug!("Inserting share token for document: {}", token.document_id);

        let ip_restrictions = token
            .ip_restrictions
            .as_ref()
            .map(|list| serde_json::to_string(list))
            .transpose()
            .map_err(|e| StorageError::InvalidRecord(format!("ip_restrictions: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO share_tokens (
                token, document_id, permissions, expires_at, usage_limit,
                usage_count, ip_restrictions, password_protected, password_hash,
                created_by, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&token.token)
        .bind(&token.document_id)
        .bind(token.permissions.as_str())
        .bind(token.expires_at.timestamp_millis())
        .bind(token.usage_limit.map(i64::from))
        .bind(i64::from(token.usage_count))
        .bind(ip_restrictions)
        .bind(token.password_protected)
        .bind(&token.password_hash)
        .bind(&token.created_by)
        .bind(token.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<ShareToken>, StorageError> {
        let row = sqlx::query("SELECT * FROM share_tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_token(&r)).transpose()
    }

    async fn get_by_document(&self, document_id: &str) -> Result<Vec<ShareToken>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM share_tokens WHERE document_id = ? ORDER BY created_at DESC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_token).collect()
    }

    async fn get_expired(&self, now: DateTime<Utc>) -> Result<Vec<ShareToken>, StorageError> {
        let rows = sqlx::query("SELECT * FROM share_tokens WHERE expires_at <= ?")
            .bind(now.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_token).collect()
    }

    async fn delete(&self, token: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM share_tokens WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn atomic_increment_usage(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<IncrementOutcome, StorageError> {
        // Single conditional UPDATE: the expiry and limit checks happen in
        // the same statement as the increment, so concurrent presentations
        // can never push usage_count past usage_limit (TOCTOU contract).
        let result = sqlx::query(
            r#"
            UPDATE share_tokens
            SET usage_count = usage_count + 1
            WHERE token = ?
              AND expires_at > ?
              AND (usage_limit IS NULL OR usage_count < usage_limit)
            "#,
        )
        .bind(token)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(IncrementOutcome::Incremented);
        }

        // Classify the refusal for the caller
        let row = sqlx::query("SELECT expires_at FROM share_tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(IncrementOutcome::NotFound),
            Some(row) => {
                let expires_at: i64 = row.try_get("expires_at")?;
                if expires_at <= now.timestamp_millis() {
                    Ok(IncrementOutcome::Expired)
                } else {
                    Ok(IncrementOutcome::LimitReached)
                }
            }
        }
    }

    async fn insert_usage(&self, usage: &ShareTokenUsage) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO share_token_usage (id, token, used_at, ip_address, user_agent, action, user_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&usage.id)
        .bind(&usage.token)
        .bind(usage.used_at.timestamp_millis())
        .bind(&usage.ip_address)
        .bind(&usage.user_agent)
        .bind(usage.action.as_str())
        .bind(&usage.user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_usage(&self, token: &str) -> Result<Vec<ShareTokenUsage>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM share_token_usage WHERE token = ? ORDER BY used_at ASC",
        )
        .bind(token)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_usage).collect()
    }
}

/// SQLite-backed audit sink writing the append-only event table.
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO share_audit_events (id, event_type, token, document_id, actor, ip_address, detail, occurred_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(nanoid::nanoid!())
        .bind(event.kind.as_str())
        .bind(&event.token)
        .bind(&event.document_id)
        .bind(&event.actor)
        .bind(&event.ip_address)
        .bind(&event.detail)
        .bind(event.occurred_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Audit sink that drops everything, for tests and embedded use.
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _event: &AuditEvent) -> Result<(), StorageError> {
        Ok(())
    }
}

fn row_to_token(row: &SqliteRow) -> Result<ShareToken, StorageError> {
    let permissions: String = row.try_get("permissions")?;
    let permissions = SharePermission::parse(&permissions)
        .ok_or_else(|| StorageError::InvalidRecord(format!("unknown permission: {permissions}")))?;

    let ip_restrictions: Option<String> = row.try_get("ip_restrictions")?;
    let ip_restrictions = ip_restrictions
        .map(|json| serde_json::from_str::<Vec<String>>(&json))
        .transpose()
        .map_err(|e| StorageError::InvalidRecord(format!("ip_restrictions: {e}")))?;

    let usage_count: i64 = row.try_get("usage_count")?;
    let usage_count = u32::try_from(usage_count)
        .map_err(|_| StorageError::InvalidRecord(format!("usage_count: {usage_count}")))?;

    let usage_limit: Option<i64> = row.try_get("usage_limit")?;
    let usage_limit = usage_limit
        .map(|limit| {
            u32::try_from(limit)
                .map_err(|_| StorageError::InvalidRecord(format!("usage_limit: {limit}")))
        })
        .transpose()?;

    Ok(ShareToken {
        token: row.try_get("token")?,
        document_id: row.try_get("document_id")?,
        permissions,
        expires_at: millis_to_datetime(row.try_get("expires_at")?)?,
        usage_limit,
        usage_count,
        ip_restrictions,
        password_protected: row.try_get("password_protected")?,
        password_hash: row.try_get("password_hash")?,
        created_by: row.try_get("created_by")?,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
    })
}

fn row_to_usage(row: &SqliteRow) -> Result<ShareTokenUsage, StorageError> {
    let action: String = row.try_get("action")?;
    let action = ShareAction::parse(&action)
        .ok_or_else(|| StorageError::InvalidRecord(format!("unknown action: {action}")))?;

    Ok(ShareTokenUsage {
        id: row.try_get("id")?,
        token: row.try_get("token")?,
        used_at: millis_to_datetime(row.try_get("used_at")?)?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        action,
        user_id: row.try_get("user_id")?,
    })
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StorageError::InvalidRecord(format!("timestamp out of range: {millis}")))
}

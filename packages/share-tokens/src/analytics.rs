// ABOUTME: Read-only aggregations over share tokens and the usage audit trail
// ABOUTME: Token statistics plus advisory security alerts; never blocks a validation

use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Row, SqlitePool};

use crate::error::ShareTokenResult;

/// Alert when one token has been used from more than this many distinct IPs.
const MULTIPLE_IP_THRESHOLD: i64 = 3;
/// Distinct-IP count at which the alert escalates.
const MULTIPLE_IP_HIGH_WATER: i64 = 10;
/// Denied validations per token per hour that suggest password guessing.
const BRUTE_FORCE_THRESHOLD: i64 = 10;
/// Successful uses per token per hour considered anomalous.
const UNUSUAL_USAGE_THRESHOLD: i64 = 20;

#[derive(Debug, Clone, Serialize)]
pub struct TokenStats {
    pub total_tokens: i64,
    pub active_tokens: i64,
    pub expired_tokens: i64,
    pub total_uses: i64,
    pub avg_uses_per_token: f64,
    pub uses_last_24h: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    MultipleIps,
    BruteForce,
    UnusualUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

/// Advisory signal for human review; never an enforcement decision.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityAlert {
    pub token: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub count: i64,
    pub detail: String,
}

/// Read-only reporting over the share-token tables.
pub struct ShareTokenAnalytics {
    pool: SqlitePool,
}

impl ShareTokenAnalytics {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Aggregate counts, optionally scoped to a single document.
    pub async fn get_token_stats(&self, document_id: Option<&str>) -> ShareTokenResult<TokenStats> {
        let now_ms = Utc::now().timestamp_millis();

        let mut total = QueryBuilder::new("SELECT COUNT(*) AS c FROM share_tokens");
        if let Some(doc) = document_id {
            total.push(" WHERE document_id = ");
            total.push_bind(doc);
        }
        let total_tokens: i64 = total.build().fetch_one(&self.pool).await?.try_get("c")?;

        let mut active = QueryBuilder::new("SELECT COUNT(*) AS c FROM share_tokens WHERE expires_at > ");
        active.push_bind(now_ms);
        active.push(" AND (usage_limit IS NULL OR usage_count < usage_limit)");
        if let Some(doc) = document_id {
            active.push(" AND document_id = ");
            active.push_bind(doc);
        }
        let active_tokens: i64 = active.build().fetch_one(&self.pool).await?.try_get("c")?;

        let mut expired = QueryBuilder::new("SELECT COUNT(*) AS c FROM share_tokens WHERE expires_at <= ");
        expired.push_bind(now_ms);
        if let Some(doc) = document_id {
            expired.push(" AND document_id = ");
            expired.push_bind(doc);
        }
        let expired_tokens: i64 = expired.build().fetch_one(&self.pool).await?.try_get("c")?;

        let total_uses = self.count_uses(document_id, None).await?;
        let day_ago = (Utc::now() - Duration::hours(24)).timestamp_millis();
        let uses_last_24h = self.count_uses(document_id, Some(day_ago)).await?;

        let avg_uses_per_token = if total_tokens > 0 {
            total_uses as f64 / total_tokens as f64
        } else {
            0.0
        };

        Ok(TokenStats {
            total_tokens,
            active_tokens,
            expired_tokens,
            total_uses,
            avg_uses_per_token,
            uses_last_24h,
        })
    }

    async fn count_uses(
        &self,
        document_id: Option<&str>,
        since_ms: Option<i64>,
    ) -> ShareTokenResult<i64> {
        // Usage rows outlive their tokens (append-only trail), so the
        // document scope needs the join while the global count does not.
        let mut query = if document_id.is_some() {
            QueryBuilder::new(
                "SELECT COUNT(*) AS c FROM share_token_usage u \
                 JOIN share_tokens t ON u.token = t.token WHERE 1 = 1",
            )
        } else {
            QueryBuilder::new("SELECT COUNT(*) AS c FROM share_token_usage u WHERE 1 = 1")
        };

        if let Some(doc) = document_id {
            query.push(" AND t.document_id = ");
            query.push_bind(doc);
        }
        if let Some(since) = since_ms {
            query.push(" AND u.used_at >= ");
            query.push_bind(since);
        }

        Ok(query.build().fetch_one(&self.pool).await?.try_get("c")?)
    }

    /// Heuristic anomaly flags over the audit trail.
    pub async fn get_security_alerts(&self) -> ShareTokenResult<Vec<SecurityAlert>> {
        let mut alerts = Vec::new();
        let hour_ago = (Utc::now() - Duration::hours(1)).timestamp_millis();

        // One token, many source addresses
        let rows = sqlx::query(
            "SELECT token, COUNT(DISTINCT ip_address) AS ips FROM share_token_usage \
             GROUP BY token HAVING ips > ?",
        )
        .bind(MULTIPLE_IP_THRESHOLD)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let token: String = row.try_get("token")?;
            let count: i64 = row.try_get("ips")?;
            let severity = if count > MULTIPLE_IP_HIGH_WATER {
                AlertSeverity::High
            } else {
                AlertSeverity::Medium
            };
            alerts.push(SecurityAlert {
                detail: format!("token used from {count} distinct IP addresses"),
                token,
                kind: AlertKind::MultipleIps,
                severity,
                count,
            });
        }

        // Repeated denials against one token inside the window
        let rows = sqlx::query(
            "SELECT token, COUNT(*) AS denials FROM share_audit_events \
             WHERE event_type = 'share.token.denied' AND occurred_at >= ? \
             GROUP BY token HAVING denials >= ?",
        )
        .bind(hour_ago)
        .bind(BRUTE_FORCE_THRESHOLD)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let token: String = row.try_get("token")?;
            let count: i64 = row.try_get("denials")?;
            alerts.push(SecurityAlert {
                detail: format!("{count} denied validations in the last hour"),
                token,
                kind: AlertKind::BruteForce,
                severity: AlertSeverity::High,
                count,
            });
        }

        // Abnormally heavy legitimate use
        let rows = sqlx::query(
            "SELECT token, COUNT(*) AS uses FROM share_token_usage \
             WHERE used_at >= ? GROUP BY token HAVING uses >= ?",
        )
        .bind(hour_ago)
        .bind(UNUSUAL_USAGE_THRESHOLD)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let token: String = row.try_get("token")?;
            let count: i64 = row.try_get("uses")?;
            alerts.push(SecurityAlert {
                detail: format!("{count} uses in the last hour"),
                token,
                kind: AlertKind::UnusualUsage,
                severity: AlertSeverity::Medium,
                count,
            });
        }

        Ok(alerts)
    }
}

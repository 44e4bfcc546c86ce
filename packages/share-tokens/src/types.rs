// ABOUTME: Type definitions for the share-token data model
// ABOUTME: Tokens, usage audit records, validation results, and audit events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Permission scope carried by a share token. `Download` implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharePermission {
    Read,
    Download,
}

impl SharePermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharePermission::Read => "read",
            SharePermission::Download => "download",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(SharePermission::Read),
            "download" => Some(SharePermission::Download),
            _ => None,
        }
    }

    pub fn allows_download(&self) -> bool {
        matches!(self, SharePermission::Download)
    }
}

/// What the bearer did with a validated token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareAction {
    View,
    Download,
}

impl ShareAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareAction::View => "view",
            ShareAction::Download => "download",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "view" => Some(ShareAction::View),
            "download" => Some(ShareAction::Download),
            _ => None,
        }
    }
}

/// A time-limited bearer token granting scoped access to one document.
///
/// The `token` string is `<hex-random-payload>.<hex-hmac-signature>`, with
/// the signature bound to `document_id`. `usage_count` is mutated only by
/// the store's atomic increment; everything else is immutable after issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareToken {
    pub token: String,
    pub document_id: String,
    pub permissions: SharePermission,
    pub expires_at: DateTime<Utc>,
    pub usage_limit: Option<u32>,
    pub usage_count: u32,
    pub ip_restrictions: Option<Vec<String>>,
    pub password_protected: bool,
    pub password_hash: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl ShareToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_exhausted(&self) -> bool {
        match self.usage_limit {
            Some(limit) => self.usage_count >= limit,
            None => false,
        }
    }

    pub fn remaining_uses(&self) -> Option<u32> {
        self.usage_limit
            .map(|limit| limit.saturating_sub(self.usage_count))
    }
}

/// Append-only audit record written once per successful validation+use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareTokenUsage {
    pub id: String,
    pub token: String,
    pub used_at: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub action: ShareAction,
    pub user_id: Option<String>,
}

/// Options for minting a new share token.
#[derive(Debug, Clone)]
pub struct CreateShareTokenOptions {
    pub document_id: String,
    pub permissions: SharePermission,
    pub expires_in_hours: f64,
    pub usage_limit: Option<u32>,
    pub ip_restrictions: Option<Vec<String>>,
    pub password: Option<String>,
    pub created_by: String,
}

impl CreateShareTokenOptions {
    pub fn new(
        document_id: impl Into<String>,
        permissions: SharePermission,
        expires_in_hours: f64,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            permissions,
            expires_in_hours,
            usage_limit: None,
            ip_restrictions: None,
            password: None,
            created_by: created_by.into(),
        }
    }

    pub fn with_usage_limit(mut self, limit: u32) -> Self {
        self.usage_limit = Some(limit);
        self
    }

    pub fn with_ip_restrictions(mut self, restrictions: Vec<String>) -> Self {
        self.ip_restrictions = Some(restrictions);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// Why a presentation was denied. `Display` strings are machine-stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("Invalid token format")]
    InvalidFormat,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token not found")]
    NotFound,

    #[error("Token expired")]
    Expired,

    #[error("Usage limit exceeded")]
    UsageLimitExceeded,

    #[error("IP address not allowed")]
    IpNotAllowed,

    #[error("Password required")]
    PasswordRequired,

    #[error("Invalid password")]
    InvalidPassword,

    /// Catch-all for unexpected internal faults on the validation path.
    #[error("Token validation failed")]
    Internal,
}

impl Serialize for ValidationFailure {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of presenting a token. Every failure mode is data; callers
/// embedding this in a user-facing response should consider collapsing the
/// specific reason into a generic denial to avoid aiding enumeration.
#[derive(Debug, Clone, Serialize)]
pub struct ShareTokenValidation {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ValidationFailure>,
    pub can_view: bool,
    pub can_download: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_uses: Option<u32>,
}

impl ShareTokenValidation {
    pub fn granted(token: &ShareToken) -> Self {
        Self {
            is_valid: true,
            error: None,
            can_view: true,
            can_download: token.permissions.allows_download(),
            remaining_uses: token.remaining_uses(),
        }
    }

    pub fn denied(reason: ValidationFailure) -> Self {
        Self {
            is_valid: false,
            error: Some(reason),
            can_view: false,
            can_download: false,
            remaining_uses: None,
        }
    }
}

/// Structured audit event kinds, named for the compliance event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventKind {
    Created,
    Used,
    Denied,
    Revoked,
    Expired,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::Created => "share.token.created",
            AuditEventKind::Used => "share.token.used",
            AuditEventKind::Denied => "share.token.denied",
            AuditEventKind::Revoked => "share.token.revoked",
            AuditEventKind::Expired => "share.token.expired",
        }
    }
}

/// Fire-and-forget event handed to the audit sink.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub token: String,
    pub document_id: String,
    pub actor: Option<String>,
    pub ip_address: Option<String>,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, token: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            kind,
            token: token.into(),
            document_id: document_id.into(),
            actor: None,
            ip_address: None,
            detail: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

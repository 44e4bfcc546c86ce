// ABOUTME: Time-limited document share tokens for the Sendoff platform
// ABOUTME: HMAC-signed issuance, constraint-chain validation, lifecycle, and usage analytics

pub mod analytics;
pub mod config;
pub mod error;
pub mod manager;
pub mod netmask;
pub mod share_url;
pub mod signing;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use analytics::{AlertKind, AlertSeverity, SecurityAlert, ShareTokenAnalytics, TokenStats};
pub use config::{ConfigError, ShareTokenConfig};
pub use error::{ShareTokenError, ShareTokenResult};
pub use manager::ShareTokenManager;
pub use share_url::{generate_share_url, ShareUrlOptions};
pub use signing::{SignatureCheck, TokenSigner};
pub use store::{
    AuditSink, IncrementOutcome, NoopAuditSink, SqliteAuditSink, SqliteTokenStore, TokenStore,
};
pub use types::{
    AuditEvent, AuditEventKind, CreateShareTokenOptions, ShareAction, SharePermission, ShareToken,
    ShareTokenUsage, ShareTokenValidation, ValidationFailure,
};

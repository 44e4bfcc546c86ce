// ABOUTME: The share-token authority: issuance, validation, and lifecycle management
// ABOUTME: Service object with injected signing secret, token store, and audit sink

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, error, warn};

use crate::config::ShareTokenConfig;
use crate::error::{ShareTokenError, ShareTokenResult};
use crate::netmask;
use crate::share_url::{generate_share_url, ShareUrlOptions};
use crate::signing::{SignatureCheck, TokenSigner};
use crate::store::{
    AuditSink, IncrementOutcome, SqliteAuditSink, SqliteTokenStore, TokenStore,
};
use crate::types::{
    AuditEvent, AuditEventKind, CreateShareTokenOptions, ShareAction, SharePermission, ShareToken,
    ShareTokenUsage, ShareTokenValidation, ValidationFailure,
};

/// Issues, validates, and manages time-limited document share tokens.
///
/// One instance per signing secret; the store and audit sink are injected
/// so tests can supply fakes and deployments can choose their backend.
pub struct ShareTokenManager {
    signer: TokenSigner,
    store: Arc<dyn TokenStore>,
    audit: Arc<dyn AuditSink>,
    base_url: String,
}

impl ShareTokenManager {
    pub fn new(
        config: &ShareTokenConfig,
        store: Arc<dyn TokenStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            signer: TokenSigner::new(config.signing_secret.as_bytes()),
            store,
            audit,
            base_url: config.base_url.clone(),
        }
    }

    /// Convenience constructor wiring the SQLite store and audit sink over
    /// one pool.
    pub fn with_sqlite(config: &ShareTokenConfig, pool: SqlitePool) -> Self {
        Self::new(
            config,
            Arc::new(SqliteTokenStore::new(pool.clone())),
            Arc::new(SqliteAuditSink::new(pool)),
        )
    }

    // --- Issuance ---

    /// Mint and persist a new share token.
    pub async fn create_share_token(
        &self,
        options: CreateShareTokenOptions,
    ) -> ShareTokenResult<ShareToken> {
        if options.document_id.trim().is_empty() {
            return Err(ShareTokenError::InvalidOptions(
                "document_id must not be empty".to_string(),
            ));
        }
        if !options.expires_in_hours.is_finite() || options.expires_in_hours <= 0.0 {
            return Err(ShareTokenError::InvalidOptions(format!(
                "expires_in_hours must be positive, got {}",
                options.expires_in_hours
            )));
        }
        if options.usage_limit == Some(0) {
            return Err(ShareTokenError::InvalidOptions(
                "usage_limit must be positive when set".to_string(),
            ));
        }

        let now = Utc::now();
        let lifetime =
            Duration::milliseconds((options.expires_in_hours * 3_600_000.0).round() as i64);
        let expires_at = now.checked_add_signed(lifetime).ok_or_else(|| {
            ShareTokenError::InvalidOptions(format!(
                "expires_in_hours out of range: {}",
                options.expires_in_hours
            ))
        })?;

        let token = self.signer.mint_token(&options.document_id)?;
        let password_hash = options
            .password
            .as_deref()
            .map(|password| self.signer.hash_password(password));

        let share = ShareToken {
            token,
            document_id: options.document_id,
            permissions: options.permissions,
            expires_at,
            usage_limit: options.usage_limit,
            usage_count: 0,
            ip_restrictions: options.ip_restrictions.filter(|list| !list.is_empty()),
            password_protected: password_hash.is_some(),
            password_hash,
            created_by: options.created_by,
            created_at: now,
        };

        self.store.insert(&share).await?;
        debug!(
            "Issued share token for document {} (expires {})",
            share.document_id, share.expires_at
        );

        self.emit(
            AuditEvent::new(AuditEventKind::Created, &share.token, &share.document_id)
                .with_actor(&share.created_by)
                .with_detail(share.permissions.as_str()),
        )
        .await;

        Ok(share)
    }

    /// Single-use download link with a short, minute-scale expiry.
    /// Returns the fully-qualified share URL.
    pub async fn create_download_link(
        &self,
        document_id: &str,
        created_by: &str,
        expires_in_minutes: f64,
    ) -> ShareTokenResult<String> {
        let options = CreateShareTokenOptions::new(
            document_id,
            SharePermission::Download,
            expires_in_minutes / 60.0,
            created_by,
        )
        .with_usage_limit(1);

        let share = self.create_share_token(options).await?;

        generate_share_url(
            &self.base_url,
            &share.document_id,
            &share.token,
            &ShareUrlOptions {
                action: Some(ShareAction::Download),
                ..Default::default()
            },
        )
    }

    /// Password-gated share with arbitrary permission and expiry.
    pub async fn create_password_protected_share(
        &self,
        document_id: &str,
        created_by: &str,
        password: &str,
        permissions: SharePermission,
        expires_in_hours: f64,
    ) -> ShareTokenResult<ShareToken> {
        let options =
            CreateShareTokenOptions::new(document_id, permissions, expires_in_hours, created_by)
                .with_password(password);
        self.create_share_token(options).await
    }

    /// Share URL for an issued token.
    pub fn share_url(
        &self,
        token: &ShareToken,
        options: &ShareUrlOptions,
    ) -> ShareTokenResult<String> {
        generate_share_url(&self.base_url, &token.document_id, &token.token, options)
    }

    // --- Validation ---

    /// Evaluate a presented token against every constraint, cheapest first.
    ///
    /// Never returns an error: all outcomes, including internal faults, are
    /// data in the result so the request path behaves uniformly. This is a
    /// pure read; call [`Self::record_token_usage`] afterwards to consume
    /// a use.
    pub async fn validate_share_token(
        &self,
        token: &str,
        document_id: &str,
        ip_address: &str,
        password: Option<&str>,
    ) -> ShareTokenValidation {
        match self.evaluate(token, document_id, ip_address, password).await {
            Ok(Ok(record)) => {
                debug!("Share token validated for document {}", document_id);
                ShareTokenValidation::granted(&record)
            }
            Ok(Err(reason)) => {
                debug!(
                    "Share token denied for document {}: {}",
                    document_id, reason
                );
                self.record_denial(token, document_id, ip_address, reason)
                    .await;
                ShareTokenValidation::denied(reason)
            }
            Err(err) => {
                error!("Share token validation fault: {}", err);
                ShareTokenValidation::denied(ValidationFailure::Internal)
            }
        }
    }

    async fn evaluate(
        &self,
        token: &str,
        document_id: &str,
        ip_address: &str,
        password: Option<&str>,
    ) -> ShareTokenResult<Result<ShareToken, ValidationFailure>> {
        // 1+2. Format and signature: no I/O, proves document binding
        match self.signer.verify_token(token, document_id) {
            SignatureCheck::Malformed => return Ok(Err(ValidationFailure::InvalidFormat)),
            SignatureCheck::Forged => return Ok(Err(ValidationFailure::InvalidSignature)),
            SignatureCheck::Valid => {}
        }

        // 3. Existence
        let Some(record) = self.store.get(token).await? else {
            return Ok(Err(ValidationFailure::NotFound));
        };

        // 4. Expiry (the expiry instant itself is dead)
        if record.is_expired(Utc::now()) {
            return Ok(Err(ValidationFailure::Expired));
        }

        // 5. Usage limit
        if record.is_exhausted() {
            return Ok(Err(ValidationFailure::UsageLimitExceeded));
        }

        // 6. IP restriction
        if let Some(restrictions) = &record.ip_restrictions {
            if !netmask::ip_allowed(ip_address, restrictions) {
                return Ok(Err(ValidationFailure::IpNotAllowed));
            }
        }

        // 7. Password
        if record.password_protected {
            let Some(password) = password else {
                return Ok(Err(ValidationFailure::PasswordRequired));
            };
            let Some(stored_hash) = record.password_hash.as_deref() else {
                // Protected flag without a hash is a corrupt record; fail closed
                warn!("Share token marked password-protected but has no hash");
                return Ok(Err(ValidationFailure::Internal));
            };
            if !self.signer.verify_password(password, stored_hash) {
                return Ok(Err(ValidationFailure::InvalidPassword));
            }
        }

        Ok(Ok(record))
    }

    // --- Lifecycle ---

    /// Consume one use of a validated token and append the audit record.
    ///
    /// Call only after a successful [`Self::validate_share_token`]. The
    /// increment is a compare-and-increment in the store, so concurrent
    /// callers racing past the validation check cannot exceed the limit;
    /// the loser gets [`ShareTokenError::UsageExhausted`].
    pub async fn record_token_usage(
        &self,
        token: &str,
        action: ShareAction,
        ip_address: &str,
        user_agent: Option<&str>,
        user_id: Option<&str>,
    ) -> ShareTokenResult<()> {
        let now = Utc::now();

        match self.store.atomic_increment_usage(token, now).await? {
            IncrementOutcome::Incremented => {}
            IncrementOutcome::NotFound => return Err(ShareTokenError::TokenNotFound),
            IncrementOutcome::Expired => return Err(ShareTokenError::TokenExpired),
            IncrementOutcome::LimitReached => return Err(ShareTokenError::UsageExhausted),
        }

        let usage = ShareTokenUsage {
            id: nanoid::nanoid!(),
            token: token.to_string(),
            used_at: now,
            ip_address: ip_address.to_string(),
            user_agent: user_agent.map(str::to_string),
            action,
            user_id: user_id.map(str::to_string),
        };
        self.store.insert_usage(&usage).await?;

        let document_id = self
            .store
            .get(token)
            .await?
            .map(|record| record.document_id)
            .unwrap_or_default();

        self.emit(
            AuditEvent::new(AuditEventKind::Used, token, document_id)
                .with_ip(ip_address)
                .with_detail(action.as_str()),
        )
        .await;

        Ok(())
    }

    /// Revoke a token before its natural expiry. Idempotent: revoking an
    /// already-gone token succeeds without a second audit event.
    pub async fn revoke_share_token(
        &self,
        token: &str,
        revoked_by: &str,
        reason: Option<&str>,
    ) -> ShareTokenResult<()> {
        let record = self.store.get(token).await?;

        if !self.store.delete(token).await? {
            debug!("Revocation of absent share token ignored");
            return Ok(());
        }

        let document_id = record.map(|r| r.document_id).unwrap_or_default();
        let mut event = AuditEvent::new(AuditEventKind::Revoked, token, document_id)
            .with_actor(revoked_by);
        if let Some(reason) = reason {
            event = event.with_detail(reason);
        }
        self.emit(event).await;

        Ok(())
    }

    /// List tokens issued for a document, newest first.
    pub async fn get_document_tokens(
        &self,
        document_id: &str,
        include_expired: bool,
    ) -> ShareTokenResult<Vec<ShareToken>> {
        let now = Utc::now();
        let mut tokens = self.store.get_by_document(document_id).await?;
        if !include_expired {
            tokens.retain(|token| !token.is_expired(now));
        }
        Ok(tokens)
    }

    /// Sweep tokens past expiry. Returns the number removed.
    ///
    /// Safe to run alongside active validations: a token expiring or
    /// disappearing mid-sweep simply fails its own checks elsewhere.
    pub async fn cleanup_expired_tokens(&self) -> ShareTokenResult<u64> {
        let now = Utc::now();
        let expired = self.store.get_expired(now).await?;

        let mut removed = 0u64;
        for token in expired {
            // delete() is false if a concurrent sweep or revocation won
            if self.store.delete(&token.token).await? {
                removed += 1;
                self.emit(
                    AuditEvent::new(AuditEventKind::Expired, &token.token, &token.document_id)
                        .with_detail("removed by expiry cleanup"),
                )
                .await;
            }
        }

        debug!("Expiry cleanup removed {} share tokens", removed);
        Ok(removed)
    }

    // --- Audit plumbing ---

    async fn record_denial(
        &self,
        token: &str,
        document_id: &str,
        ip_address: &str,
        reason: ValidationFailure,
    ) {
        let kind = if reason == ValidationFailure::Expired {
            AuditEventKind::Expired
        } else {
            AuditEventKind::Denied
        };

        self.emit(
            AuditEvent::new(kind, token, document_id)
                .with_ip(ip_address)
                .with_detail(reason.to_string()),
        )
        .await;
    }

    async fn emit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.record(&event).await {
            warn!(
                "Failed to record audit event {}: {}",
                event.kind.as_str(),
                err
            );
        }
    }
}

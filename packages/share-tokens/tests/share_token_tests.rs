// ABOUTME: Integration tests for share-token issuance, validation, and lifecycle
// ABOUTME: Exercises the full constraint chain against a real SQLite database

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use sqlx::SqlitePool;
use tempfile::TempDir;

use sendoff_share_tokens::{
    CreateShareTokenOptions, ShareAction, SharePermission, ShareToken, ShareTokenConfig,
    ShareTokenError, ShareTokenManager, SqliteTokenStore, TokenSigner, TokenStore,
    ValidationFailure,
};

const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

async fn setup() -> (ShareTokenManager, SqlitePool, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let pool = sendoff_storage::connect(&temp_dir.path().join("share.db"))
        .await
        .unwrap();

    let config = ShareTokenConfig::new(TEST_SECRET, "https://app.sendoff.example").unwrap();
    let manager = ShareTokenManager::with_sqlite(&config, pool.clone());

    (manager, pool, temp_dir)
}

/// Insert a token that expired in the past, bypassing the issuer's
/// positive-expiry check.
async fn insert_expired_token(pool: &SqlitePool, document_id: &str) -> ShareToken {
    let signer = TokenSigner::new(TEST_SECRET.as_bytes());
    let now = Utc::now();
    let token = ShareToken {
        token: signer.mint_token(document_id).unwrap(),
        document_id: document_id.to_string(),
        permissions: SharePermission::Read,
        expires_at: now - Duration::minutes(5),
        usage_limit: None,
        usage_count: 0,
        ip_restrictions: None,
        password_protected: false,
        password_hash: None,
        created_by: "tester".to_string(),
        created_at: now - Duration::hours(1),
    };

    SqliteTokenStore::new(pool.clone())
        .insert(&token)
        .await
        .unwrap();
    token
}

#[tokio::test]
async fn test_issued_token_round_trips() {
    let (manager, _pool, _tmp) = setup().await;

    let share = manager
        .create_share_token(
            CreateShareTokenOptions::new("doc-1", SharePermission::Read, 2.0, "director-7")
                .with_usage_limit(5),
        )
        .await
        .unwrap();

    assert_eq!(share.document_id, "doc-1");
    assert_eq!(share.usage_count, 0);
    assert_eq!(share.usage_limit, Some(5));
    assert_eq!(share.created_by, "director-7");
    assert!(!share.password_protected);

    let result = manager
        .validate_share_token(&share.token, "doc-1", "1.2.3.4", None)
        .await;
    assert!(result.is_valid);
    assert!(result.can_view);
    assert!(!result.can_download);
    assert_eq!(result.remaining_uses, Some(5));
}

#[tokio::test]
async fn test_signature_binds_token_to_document() {
    let (manager, _pool, _tmp) = setup().await;

    let share = manager
        .create_share_token(CreateShareTokenOptions::new(
            "doc-a",
            SharePermission::Read,
            1.0,
            "tester",
        ))
        .await
        .unwrap();

    let result = manager
        .validate_share_token(&share.token, "doc-b", "1.2.3.4", None)
        .await;
    assert!(!result.is_valid);
    assert_eq!(result.error, Some(ValidationFailure::InvalidSignature));
}

#[tokio::test]
async fn test_tampered_signature_is_rejected() {
    let (manager, _pool, _tmp) = setup().await;

    let share = manager
        .create_share_token(CreateShareTokenOptions::new(
            "doc-1",
            SharePermission::Read,
            1.0,
            "tester",
        ))
        .await
        .unwrap();

    let mut tampered = share.token.clone();
    let last = tampered.pop().unwrap();
    tampered.push(if last == 'f' { '0' } else { 'f' });

    let result = manager
        .validate_share_token(&tampered, "doc-1", "1.2.3.4", None)
        .await;
    assert_eq!(result.error, Some(ValidationFailure::InvalidSignature));
}

#[tokio::test]
async fn test_malformed_token_is_rejected_before_lookup() {
    let (manager, _pool, _tmp) = setup().await;

    for garbage in ["", "nodots", ".sig", "payload.", "a.b.c"] {
        let result = manager
            .validate_share_token(garbage, "doc-1", "1.2.3.4", None)
            .await;
        assert_eq!(
            result.error,
            Some(ValidationFailure::InvalidFormat),
            "token {garbage:?}"
        );
    }
}

#[tokio::test]
async fn test_signed_but_unpersisted_token_is_not_found() {
    let (manager, _pool, _tmp) = setup().await;

    let signer = TokenSigner::new(TEST_SECRET.as_bytes());
    let token = signer.mint_token("doc-1").unwrap();

    let result = manager
        .validate_share_token(&token, "doc-1", "1.2.3.4", None)
        .await;
    assert_eq!(result.error, Some(ValidationFailure::NotFound));
}

#[tokio::test]
async fn test_expired_token_is_rejected() {
    let (manager, pool, _tmp) = setup().await;

    let token = insert_expired_token(&pool, "doc-1").await;

    let result = manager
        .validate_share_token(&token.token, "doc-1", "1.2.3.4", None)
        .await;
    assert_eq!(result.error, Some(ValidationFailure::Expired));
}

#[tokio::test]
async fn test_expired_token_cannot_record_usage() {
    let (manager, pool, _tmp) = setup().await;

    let token = insert_expired_token(&pool, "doc-1").await;

    let err = manager
        .record_token_usage(&token.token, ShareAction::View, "1.2.3.4", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ShareTokenError::TokenExpired));

    // The dead token was not mutated
    let stored = SqliteTokenStore::new(pool.clone())
        .get(&token.token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.usage_count, 0);
}

#[tokio::test]
async fn test_usage_limit_enforced_exactly() {
    let (manager, _pool, _tmp) = setup().await;

    let share = manager
        .create_share_token(
            CreateShareTokenOptions::new("doc-1", SharePermission::Read, 1.0, "tester")
                .with_usage_limit(2),
        )
        .await
        .unwrap();

    for expected_remaining in [2u32, 1] {
        let result = manager
            .validate_share_token(&share.token, "doc-1", "1.2.3.4", None)
            .await;
        assert!(result.is_valid);
        assert_eq!(result.remaining_uses, Some(expected_remaining));

        manager
            .record_token_usage(&share.token, ShareAction::View, "1.2.3.4", None, None)
            .await
            .unwrap();
    }

    let result = manager
        .validate_share_token(&share.token, "doc-1", "1.2.3.4", None)
        .await;
    assert_eq!(result.error, Some(ValidationFailure::UsageLimitExceeded));

    let err = manager
        .record_token_usage(&share.token, ShareAction::View, "1.2.3.4", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ShareTokenError::UsageExhausted));
}

#[tokio::test]
async fn test_password_round_trip() {
    let (manager, _pool, _tmp) = setup().await;

    let share = manager
        .create_password_protected_share("doc-1", "tester", "p", SharePermission::Read, 1.0)
        .await
        .unwrap();

    assert!(share.password_protected);
    assert_ne!(share.password_hash.as_deref(), Some("p"));

    let ok = manager
        .validate_share_token(&share.token, "doc-1", "1.2.3.4", Some("p"))
        .await;
    assert!(ok.is_valid);

    let wrong = manager
        .validate_share_token(&share.token, "doc-1", "1.2.3.4", Some("wrong"))
        .await;
    assert_eq!(wrong.error, Some(ValidationFailure::InvalidPassword));

    let missing = manager
        .validate_share_token(&share.token, "doc-1", "1.2.3.4", None)
        .await;
    assert_eq!(missing.error, Some(ValidationFailure::PasswordRequired));
}

#[tokio::test]
async fn test_ip_allowlist() {
    let (manager, _pool, _tmp) = setup().await;

    let share = manager
        .create_share_token(
            CreateShareTokenOptions::new("doc-1", SharePermission::Read, 1.0, "tester")
                .with_ip_restrictions(vec!["10.0.0.5".to_string(), "192.168.0.0/16".to_string()]),
        )
        .await
        .unwrap();

    let allowed = manager
        .validate_share_token(&share.token, "doc-1", "10.0.0.5", None)
        .await;
    assert!(allowed.is_valid);

    let in_range = manager
        .validate_share_token(&share.token, "doc-1", "192.168.7.9", None)
        .await;
    assert!(in_range.is_valid);

    let denied = manager
        .validate_share_token(&share.token, "doc-1", "10.0.0.6", None)
        .await;
    assert_eq!(denied.error, Some(ValidationFailure::IpNotAllowed));
}

#[tokio::test]
async fn test_revocation_is_idempotent() {
    let (manager, _pool, _tmp) = setup().await;

    let share = manager
        .create_share_token(CreateShareTokenOptions::new(
            "doc-1",
            SharePermission::Read,
            1.0,
            "tester",
        ))
        .await
        .unwrap();

    manager
        .revoke_share_token(&share.token, "admin-1", Some("family request"))
        .await
        .unwrap();

    let result = manager
        .validate_share_token(&share.token, "doc-1", "1.2.3.4", None)
        .await;
    assert_eq!(result.error, Some(ValidationFailure::NotFound));

    // Second revocation of the same token must not fail
    manager
        .revoke_share_token(&share.token, "admin-1", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cleanup_removes_exactly_the_expired_set() {
    let (manager, pool, _tmp) = setup().await;

    let mut expired = Vec::new();
    for i in 0..3 {
        expired.push(insert_expired_token(&pool, &format!("doc-expired-{i}")).await);
    }
    let live_a = manager
        .create_share_token(CreateShareTokenOptions::new(
            "doc-live",
            SharePermission::Read,
            1.0,
            "tester",
        ))
        .await
        .unwrap();
    let live_b = manager
        .create_share_token(CreateShareTokenOptions::new(
            "doc-live",
            SharePermission::Download,
            2.0,
            "tester",
        ))
        .await
        .unwrap();

    let removed = manager.cleanup_expired_tokens().await.unwrap();
    assert_eq!(removed, 3);

    let store = SqliteTokenStore::new(pool.clone());
    for token in &expired {
        assert!(store.get(&token.token).await.unwrap().is_none());
    }
    assert!(store.get(&live_a.token).await.unwrap().is_some());
    assert!(store.get(&live_b.token).await.unwrap().is_some());

    // A second sweep finds nothing
    assert_eq!(manager.cleanup_expired_tokens().await.unwrap(), 0);
}

#[tokio::test]
async fn test_get_document_tokens_filters_expired() {
    let (manager, pool, _tmp) = setup().await;

    insert_expired_token(&pool, "doc-1").await;
    manager
        .create_share_token(CreateShareTokenOptions::new(
            "doc-1",
            SharePermission::Read,
            1.0,
            "tester",
        ))
        .await
        .unwrap();

    let live = manager.get_document_tokens("doc-1", false).await.unwrap();
    assert_eq!(live.len(), 1);

    let all = manager.get_document_tokens("doc-1", true).await.unwrap();
    assert_eq!(all.len(), 2);

    assert!(manager
        .get_document_tokens("doc-other", true)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_invalid_issuance_options() {
    let (manager, _pool, _tmp) = setup().await;

    let empty_doc = manager
        .create_share_token(CreateShareTokenOptions::new(
            "  ",
            SharePermission::Read,
            1.0,
            "tester",
        ))
        .await
        .unwrap_err();
    assert!(matches!(empty_doc, ShareTokenError::InvalidOptions(_)));

    let bad_expiry = manager
        .create_share_token(CreateShareTokenOptions::new(
            "doc-1",
            SharePermission::Read,
            0.0,
            "tester",
        ))
        .await
        .unwrap_err();
    assert!(matches!(bad_expiry, ShareTokenError::InvalidOptions(_)));

    let zero_limit = manager
        .create_share_token(
            CreateShareTokenOptions::new("doc-1", SharePermission::Read, 1.0, "tester")
                .with_usage_limit(0),
        )
        .await
        .unwrap_err();
    assert!(matches!(zero_limit, ShareTokenError::InvalidOptions(_)));
}

#[tokio::test]
async fn test_astronomical_expiry_is_an_error_not_a_panic() {
    let (manager, _pool, _tmp) = setup().await;

    // Finite and positive, but far past the representable timestamp range
    let err = manager
        .create_share_token(CreateShareTokenOptions::new(
            "doc-1",
            SharePermission::Read,
            1.0e12,
            "tester",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, ShareTokenError::InvalidOptions(_)));
}

#[tokio::test]
async fn test_fractional_expiry_is_sub_hour() {
    let (manager, _pool, _tmp) = setup().await;

    let before = Utc::now();
    let share = manager
        .create_share_token(CreateShareTokenOptions::new(
            "doc-1",
            SharePermission::Read,
            0.5,
            "tester",
        ))
        .await
        .unwrap();

    let lifetime = share.expires_at - before;
    assert!(lifetime <= Duration::minutes(31));
    assert!(lifetime >= Duration::minutes(29));
}

#[tokio::test]
async fn test_create_download_link_url() {
    let (manager, _pool, _tmp) = setup().await;

    let link = manager
        .create_download_link("doc-42", "director-7", 15.0)
        .await
        .unwrap();

    let url = url::Url::parse(&link).unwrap();
    assert_eq!(url.host_str(), Some("app.sendoff.example"));
    assert!(url.path().contains("/documents/doc-42/shared"));

    let token = url
        .query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.to_string())
        .unwrap();
    let action = url
        .query_pairs()
        .find(|(k, _)| k == "action")
        .map(|(_, v)| v.to_string())
        .unwrap();
    assert_eq!(action, "download");

    // The embedded token is live, single-use, download-scoped
    let result = manager
        .validate_share_token(&token, "doc-42", "1.2.3.4", None)
        .await;
    assert!(result.is_valid);
    assert!(result.can_download);
    assert_eq!(result.remaining_uses, Some(1));
}

#[tokio::test]
async fn test_end_to_end_single_use_download() {
    let (manager, _pool, _tmp) = setup().await;

    let share = manager
        .create_share_token(
            CreateShareTokenOptions::new("doc-42", SharePermission::Download, 1.0, "director-7")
                .with_usage_limit(1),
        )
        .await
        .unwrap();

    let first = manager
        .validate_share_token(&share.token, "doc-42", "1.2.3.4", None)
        .await;
    assert!(first.is_valid);
    assert!(first.can_download);
    assert!(first.can_view);
    assert_eq!(first.remaining_uses, Some(1));

    manager
        .record_token_usage(
            &share.token,
            ShareAction::Download,
            "1.2.3.4",
            Some("Mozilla/5.0"),
            Some("family-member-3"),
        )
        .await
        .unwrap();

    let second = manager
        .validate_share_token(&share.token, "doc-42", "1.2.3.4", None)
        .await;
    assert!(!second.is_valid);
    assert_eq!(second.error, Some(ValidationFailure::UsageLimitExceeded));
    assert_eq!(
        second.error.unwrap().to_string(),
        "Usage limit exceeded"
    );
}

#[tokio::test]
async fn test_audit_trail_records_lifecycle() {
    let (manager, pool, _tmp) = setup().await;

    let share = manager
        .create_share_token(
            CreateShareTokenOptions::new("doc-1", SharePermission::Read, 1.0, "tester")
                .with_usage_limit(5),
        )
        .await
        .unwrap();

    manager
        .validate_share_token(&share.token, "doc-1", "1.2.3.4", None)
        .await;
    manager
        .record_token_usage(&share.token, ShareAction::View, "1.2.3.4", None, None)
        .await
        .unwrap();
    manager
        .validate_share_token(&share.token, "doc-other", "1.2.3.4", None)
        .await; // denied: wrong document
    manager
        .revoke_share_token(&share.token, "admin-1", Some("test"))
        .await
        .unwrap();

    let counts: Vec<(String, i64)> = sqlx::query_as(
        "SELECT event_type, COUNT(*) FROM share_audit_events GROUP BY event_type ORDER BY event_type",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    let get = |kind: &str| {
        counts
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    };
    assert_eq!(get("share.token.created"), 1);
    assert_eq!(get("share.token.used"), 1);
    assert_eq!(get("share.token.denied"), 1);
    assert_eq!(get("share.token.revoked"), 1);
}

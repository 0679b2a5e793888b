//! Verification token lifecycle tests
//!
//! Rate limiting, supersession and single-use semantics against the
//! in-memory token store.

use chrono::Duration;
use std::sync::Arc;

use tc_identity::verification::{
    MemoryVerificationTokenRepository, TokenPolicy, TokenType, VerificationToken,
    VerificationTokenService,
};
use tc_identity::IdentityError;

fn setup() -> (Arc<VerificationTokenService>, MemoryVerificationTokenRepository) {
    let repo = MemoryVerificationTokenRepository::new();
    let service = VerificationTokenService::new(Arc::new(repo.clone()), TokenPolicy::default());
    (Arc::new(service), repo)
}

fn seeded(value: &str, created_minutes_ago: i64, ttl_minutes: i64) -> VerificationToken {
    let now = tc_identity::shared::now();
    let created_at = now - Duration::minutes(created_minutes_ago);
    VerificationToken::new(
        value,
        "U1",
        "alice@acme.test",
        TokenType::EmailVerification,
        created_at,
        created_at + Duration::minutes(ttl_minutes),
    )
}

#[tokio::test]
async fn test_issue_validate_then_already_used() {
    let (service, _) = setup();
    let issued = service
        .issue("U1", "alice@acme.test", TokenType::EmailVerification)
        .await
        .unwrap();
    assert_eq!(issued.token.len(), 64);

    let validated = service
        .validate(&issued.token, TokenType::EmailVerification)
        .await
        .unwrap();
    assert_eq!(validated.user_id, "U1");
    assert_eq!(validated.email, "alice@acme.test");

    let err = service
        .validate(&issued.token, TokenType::EmailVerification)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::TokenAlreadyUsed));
}

#[tokio::test]
async fn test_unknown_token_is_not_found() {
    let (service, _) = setup();
    let err = service
        .validate("deadbeef", TokenType::PasswordReset)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::TokenNotFound));
    assert_eq!(err.code(), "TOKEN_NOT_FOUND");
}

#[tokio::test]
async fn test_fourth_issuance_within_hour_is_rate_limited() {
    let (service, _) = setup();
    for _ in 0..3 {
        service
            .issue("U1", "alice@acme.test", TokenType::EmailVerification)
            .await
            .unwrap();
    }

    let err = service
        .issue("U1", "alice@acme.test", TokenType::EmailVerification)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::RateLimited { .. }));

    // Other subjects and other token types have their own budget
    service
        .issue("U2", "bob@acme.test", TokenType::EmailVerification)
        .await
        .unwrap();
    service
        .issue("U1", "alice@acme.test", TokenType::PasswordReset)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_issuance_allowed_once_window_has_passed() {
    let (service, repo) = setup();
    repo.insert_raw(seeded("t1", 120, 24 * 60));
    repo.insert_raw(seeded("t2", 90, 24 * 60));
    repo.insert_raw(seeded("t3", 61, 24 * 60));

    service
        .issue("U1", "alice@acme.test", TokenType::EmailVerification)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_retry_hint_tracks_oldest_token_in_window() {
    let (service, repo) = setup();
    repo.insert_raw(seeded("t1", 50, 24 * 60));
    repo.insert_raw(seeded("t2", 20, 24 * 60));
    repo.insert_raw(seeded("t3", 10, 24 * 60));

    match service
        .issue("U1", "alice@acme.test", TokenType::EmailVerification)
        .await
    {
        Err(IdentityError::RateLimited { retry_after_secs, .. }) => {
            // The oldest token leaves the window in about ten minutes
            assert!((540..=600).contains(&retry_after_secs), "{}", retry_after_secs);
        }
        other => panic!("expected RateLimited, got {:?}", other),
    }
}

#[tokio::test]
async fn test_expired_token_reports_expired_even_if_unused() {
    let (service, repo) = setup();
    repo.insert_raw(seeded("old", 120, 60));

    let err = service
        .validate("old", TokenType::EmailVerification)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::TokenExpired));
}

#[tokio::test]
async fn test_used_check_precedes_expiry_check() {
    let (service, repo) = setup();
    let mut token = seeded("spent", 120, 60);
    token.used_at = Some(token.created_at + Duration::minutes(5));
    repo.insert_raw(token);

    let err = service
        .validate("spent", TokenType::EmailVerification)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::TokenAlreadyUsed));
}

#[tokio::test]
async fn test_new_token_supersedes_previous_unused() {
    let (service, _) = setup();
    let first = service
        .issue("U1", "alice@acme.test", TokenType::PasswordReset)
        .await
        .unwrap();
    let second = service
        .issue("U1", "alice@acme.test", TokenType::PasswordReset)
        .await
        .unwrap();

    let err = service
        .validate(&first.token, TokenType::PasswordReset)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::TokenNotFound));

    service
        .validate(&second.token, TokenType::PasswordReset)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_password_reset_subject_is_email() {
    let (service, _) = setup();
    service
        .issue("U1", "shared@acme.test", TokenType::PasswordReset)
        .await
        .unwrap();
    service
        .issue("U2", "shared@acme.test", TokenType::PasswordReset)
        .await
        .unwrap();
    service
        .issue("U3", "shared@acme.test", TokenType::PasswordReset)
        .await
        .unwrap();

    let err = service
        .issue("U4", "shared@acme.test", TokenType::PasswordReset)
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::RateLimited { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_validation_has_exactly_one_winner() {
    let (service, _) = setup();
    let issued = service
        .issue("U1", "alice@acme.test", TokenType::EmailVerification)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let service = Arc::clone(&service);
        let token = issued.token.clone();
        handles.push(tokio::spawn(async move {
            service.validate(&token, TokenType::EmailVerification).await
        }));
    }

    let mut successes = 0;
    let mut already_used = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(IdentityError::TokenAlreadyUsed) => already_used += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(already_used, 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issuance_respects_limit() {
    let (service, repo) = setup();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .issue("U1", "alice@acme.test", TokenType::EmailVerification)
                .await
        }));
    }

    let mut issued = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            issued += 1;
        }
    }
    assert_eq!(issued, 3);
    assert_eq!(repo.len(), 3);

    let active: Vec<_> = repo.all().into_iter().filter(|t| !t.is_superseded()).collect();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn test_purge_removes_only_expired() {
    let (service, repo) = setup();
    repo.insert_raw(seeded("old", 3 * 24 * 60, 60));
    service
        .issue("U9", "zed@acme.test", TokenType::EmailVerification)
        .await
        .unwrap();

    let purged = service.purge_expired(tc_identity::shared::now()).await.unwrap();
    assert_eq!(purged, 1);
    assert_eq!(repo.len(), 1);
}

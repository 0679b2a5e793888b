//! Verification Token Service
//!
//! Single-use tokens for email verification and password reset. Each
//! subject may request a limited number of tokens per trailing hour and only
//! its newest token is ever valid.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::entity::{TokenType, VerificationToken};
use super::repository::{IssueOutcome, VerificationTokenRepository};
use crate::shared::error::{IdentityError, Result};

/// Raw token entropy in bytes. Hex encoding doubles the length.
pub const TOKEN_BYTES: usize = 32;

const RATE_LIMIT_WINDOW_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    pub max_per_hour: u32,
    pub email_verification_ttl: Duration,
    pub password_reset_ttl: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            max_per_hour: 3,
            email_verification_ttl: Duration::hours(24),
            password_reset_ttl: Duration::hours(1),
        }
    }
}

impl TokenPolicy {
    pub fn from_secs(max_per_hour: u32, email_verification_ttl: u64, password_reset_ttl: u64) -> Self {
        Self {
            max_per_hour,
            email_verification_ttl: Duration::seconds(email_verification_ttl as i64),
            password_reset_ttl: Duration::seconds(password_reset_ttl as i64),
        }
    }

    pub fn ttl_for(&self, token_type: TokenType) -> Duration {
        match token_type {
            TokenType::EmailVerification => self.email_verification_ttl,
            TokenType::PasswordReset => self.password_reset_ttl,
        }
    }
}

/// Returned once on issuance. The token value is never retrievable again
/// through this service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub token_type: TokenType,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedToken {
    pub user_id: String,
    pub email: String,
    pub token_type: TokenType,
}

pub struct VerificationTokenService {
    repository: Arc<dyn VerificationTokenRepository>,
    policy: TokenPolicy,
}

impl VerificationTokenService {
    pub fn new(repository: Arc<dyn VerificationTokenRepository>, policy: TokenPolicy) -> Self {
        Self { repository, policy }
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    pub async fn issue(&self, user_id: &str, email: &str, token_type: TokenType) -> Result<IssuedToken> {
        let now = crate::shared::now();
        let window = Duration::seconds(RATE_LIMIT_WINDOW_SECS);
        let expires_at = now + self.policy.ttl_for(token_type);
        let token = VerificationToken::new(
            generate_token_value(),
            user_id,
            email,
            token_type,
            now,
            expires_at,
        );

        match self
            .repository
            .issue(&token, now - window, self.policy.max_per_hour)
            .await?
        {
            IssueOutcome::Issued => {
                metrics::counter!("tokens.issued_total").increment(1);
                info!(user_id, token_type = %token_type, "Verification token issued");
                Ok(IssuedToken {
                    token: token.token,
                    token_type,
                    expires_at,
                })
            }
            IssueOutcome::RateLimited { oldest } => {
                metrics::counter!("tokens.rate_limited_total").increment(1);
                let retry_after = (oldest + window - now).num_seconds().max(1) as u64;
                warn!(user_id, token_type = %token_type, retry_after, "Verification token rate limited");
                Err(IdentityError::rate_limited(
                    format!(
                        "Too many {} requests, try again in {}",
                        describe(token_type),
                        human_wait(retry_after)
                    ),
                    retry_after,
                ))
            }
        }
    }

    /// Consume a token. Reports, in order: unknown (including wrong type or
    /// superseded), already used, expired.
    pub async fn validate(&self, token: &str, token_type: TokenType) -> Result<ValidatedToken> {
        let now = crate::shared::now();
        let stored = self.lookup(token, token_type).await?;

        if stored.is_used() {
            return Err(IdentityError::TokenAlreadyUsed);
        }
        if stored.is_expired_at(now) {
            return Err(IdentityError::TokenExpired);
        }

        if !self.repository.mark_used(token, token_type, now).await? {
            // Lost a race with a concurrent validation or expired in between
            let current = self.lookup(token, token_type).await?;
            if current.is_used() {
                return Err(IdentityError::TokenAlreadyUsed);
            }
            if current.is_expired_at(crate::shared::now()) {
                return Err(IdentityError::TokenExpired);
            }
            return Err(IdentityError::TokenNotFound);
        }

        debug!(user_id = %stored.user_id, token_type = %token_type, "Verification token consumed");
        Ok(ValidatedToken {
            user_id: stored.user_id,
            email: stored.email,
            token_type,
        })
    }

    pub async fn purge_expired(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let purged = self.repository.purge_expired(older_than).await?;
        if purged > 0 {
            info!(purged, "Purged expired verification tokens");
        }
        Ok(purged)
    }

    async fn lookup(&self, token: &str, token_type: TokenType) -> Result<VerificationToken> {
        match self.repository.find_by_token(token).await? {
            Some(t) if t.token_type == token_type && !t.is_superseded() => Ok(t),
            _ => Err(IdentityError::TokenNotFound),
        }
    }
}

/// 32 random bytes from the thread-local CSPRNG, hex encoded.
pub fn generate_token_value() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}

fn describe(token_type: TokenType) -> &'static str {
    match token_type {
        TokenType::EmailVerification => "email verification",
        TokenType::PasswordReset => "password reset",
    }
}

fn human_wait(secs: u64) -> String {
    let minutes = secs.div_ceil(60);
    if minutes <= 1 {
        "1 minute".to_string()
    } else {
        format!("{} minutes", minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::repository::MemoryVerificationTokenRepository;

    fn service(repo: MemoryVerificationTokenRepository) -> VerificationTokenService {
        VerificationTokenService::new(Arc::new(repo), TokenPolicy::default())
    }

    #[test]
    fn test_token_value_is_64_hex_chars() {
        let value = generate_token_value();
        assert_eq!(value.len(), 64);
        assert!(value.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(value, generate_token_value());
    }

    #[test]
    fn test_human_wait() {
        assert_eq!(human_wait(5), "1 minute");
        assert_eq!(human_wait(61), "2 minutes");
    }

    #[tokio::test]
    async fn test_ttl_depends_on_type() {
        let svc = service(MemoryVerificationTokenRepository::new());
        let before = crate::shared::now();
        let email = svc.issue("U1", "u@x.test", TokenType::EmailVerification).await.unwrap();
        let reset = svc.issue("U1", "u@x.test", TokenType::PasswordReset).await.unwrap();
        assert!(email.expires_at >= before + Duration::hours(24));
        assert!(reset.expires_at < before + Duration::hours(2));
    }

    #[tokio::test]
    async fn test_wrong_type_is_not_found() {
        let svc = service(MemoryVerificationTokenRepository::new());
        let issued = svc.issue("U1", "u@x.test", TokenType::EmailVerification).await.unwrap();
        let err = svc.validate(&issued.token, TokenType::PasswordReset).await.unwrap_err();
        assert!(matches!(err, IdentityError::TokenNotFound));
        assert!(svc.validate(&issued.token, TokenType::EmailVerification).await.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_hint() {
        let svc = service(MemoryVerificationTokenRepository::new());
        for _ in 0..3 {
            svc.issue("U1", "u@x.test", TokenType::PasswordReset).await.unwrap();
        }
        match svc.issue("U2", "u@x.test", TokenType::PasswordReset).await {
            Err(IdentityError::RateLimited { retry_after_secs, message }) => {
                assert!(retry_after_secs > 3500 && retry_after_secs <= 3600);
                assert!(message.contains("password reset"));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }
}

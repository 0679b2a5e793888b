//! Verification Token Repository
//!
//! Issuance is one atomic step per subject: count the subject's tokens in
//! the rate-limit window, supersede its unused tokens and insert the new
//! one. MongoDB runs this in a multi-document transaction that also bumps a
//! per-subject guard document, so two concurrent issuers for the same
//! subject always conflict and one of them retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, Document},
    error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    Client, ClientSession, Collection, Database,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use super::entity::{TokenType, VerificationToken};
use crate::shared::error::{IdentityError, Result};
use crate::shared::indexes::{VERIFICATION_TOKENS, VERIFICATION_TOKEN_GUARDS};

const MAX_TRANSACTION_ATTEMPTS: u32 = 5;
const MAX_COMMIT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    Issued,
    /// The window is full. `oldest` is the creation time of the earliest
    /// token still inside it.
    RateLimited { oldest: DateTime<Utc> },
}

#[async_trait]
pub trait VerificationTokenRepository: Send + Sync {
    /// Atomically: if fewer than `max_in_window` tokens of this subject and
    /// type were created at or after `window_start`, supersede the
    /// subject's unused tokens and insert `token`.
    async fn issue(
        &self,
        token: &VerificationToken,
        window_start: DateTime<Utc>,
        max_in_window: u32,
    ) -> Result<IssueOutcome>;

    async fn find_by_token(&self, token: &str) -> Result<Option<VerificationToken>>;

    /// Conditional update: sets `usedAt` only if the token is of this type,
    /// unused, not superseded and not expired at `at`. Returns whether this
    /// call consumed it.
    async fn mark_used(&self, token: &str, token_type: TokenType, at: DateTime<Utc>)
        -> Result<bool>;

    /// Delete tokens that expired before `older_than`.
    async fn purge_expired(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

/// A commit with an unknown outcome is retried, at most
/// `MAX_COMMIT_ATTEMPTS` times in total.
fn retry_commit(unknown_result: bool, attempt: u32) -> bool {
    unknown_result && attempt < MAX_COMMIT_ATTEMPTS
}

fn subject_filter(token: &VerificationToken) -> Document {
    let mut filter = doc! { "tokenType": token.token_type.as_str() };
    filter.insert(token.token_type.subject_field(), token.subject());
    filter
}

pub struct MongoVerificationTokenRepository {
    client: Client,
    tokens: Collection<VerificationToken>,
    guards: Collection<Document>,
}

impl MongoVerificationTokenRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            client: db.client().clone(),
            tokens: db.collection(VERIFICATION_TOKENS),
            guards: db.collection(VERIFICATION_TOKEN_GUARDS),
        }
    }

    async fn issue_in_transaction(
        &self,
        session: &mut ClientSession,
        token: &VerificationToken,
        window_start: DateTime<Utc>,
        max_in_window: u32,
    ) -> std::result::Result<IssueOutcome, mongodb::error::Error> {
        let subject = subject_filter(token);

        let guard_id = format!("{}:{}", token.token_type.as_str(), token.subject());
        self.guards
            .update_one(doc! { "_id": &guard_id }, doc! { "$inc": { "seq": 1_i64 } })
            .upsert(true)
            .session(&mut *session)
            .await?;

        let mut window = subject.clone();
        window.insert(
            "createdAt",
            doc! { "$gte": bson::DateTime::from_chrono(window_start) },
        );
        let in_window = self
            .tokens
            .count_documents(window.clone())
            .session(&mut *session)
            .await?;

        if in_window >= u64::from(max_in_window) {
            let oldest = self
                .tokens
                .find_one(window)
                .sort(doc! { "createdAt": 1 })
                .session(&mut *session)
                .await?
                .map(|t| t.created_at)
                .unwrap_or(window_start);
            return Ok(IssueOutcome::RateLimited { oldest });
        }

        let mut active = subject;
        active.insert("usedAt", bson::Bson::Null);
        active.insert("supersededAt", bson::Bson::Null);
        let superseded = self
            .tokens
            .update_many(
                active,
                doc! { "$set": { "supersededAt": bson::DateTime::from_chrono(token.created_at) } },
            )
            .session(&mut *session)
            .await?;
        if superseded.modified_count > 0 {
            debug!(
                token_type = %token.token_type,
                count = superseded.modified_count,
                "Superseded previous tokens"
            );
        }

        self.tokens.insert_one(token).session(&mut *session).await?;
        Ok(IssueOutcome::Issued)
    }

    async fn commit(session: &mut ClientSession) -> std::result::Result<(), mongodb::error::Error> {
        let mut attempt = 1;
        loop {
            match session.commit_transaction().await {
                Err(e)
                    if retry_commit(e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT), attempt) =>
                {
                    warn!(error = %e, attempt, "Commit result unknown, retrying commit");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl VerificationTokenRepository for MongoVerificationTokenRepository {
    async fn issue(
        &self,
        token: &VerificationToken,
        window_start: DateTime<Utc>,
        max_in_window: u32,
    ) -> Result<IssueOutcome> {
        let mut session = self.client.start_session().await?;
        let mut attempt = 0;

        loop {
            attempt += 1;
            session.start_transaction().await?;

            let outcome = match self
                .issue_in_transaction(&mut session, token, window_start, max_in_window)
                .await
            {
                Ok(IssueOutcome::Issued) => Self::commit(&mut session)
                    .await
                    .map(|_| IssueOutcome::Issued),
                Ok(limited) => {
                    let _ = session.abort_transaction().await;
                    Ok(limited)
                }
                Err(e) => {
                    let _ = session.abort_transaction().await;
                    Err(e)
                }
            };

            match outcome {
                Ok(outcome) => return Ok(outcome),
                Err(e)
                    if e.contains_label(TRANSIENT_TRANSACTION_ERROR)
                        && attempt < MAX_TRANSACTION_ATTEMPTS =>
                {
                    debug!(attempt, error = %e, "Token issuance conflicted, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<VerificationToken>> {
        Ok(self.tokens.find_one(doc! { "token": token }).await?)
    }

    async fn mark_used(
        &self,
        token: &str,
        token_type: TokenType,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let at = bson::DateTime::from_chrono(at);
        let result = self
            .tokens
            .update_one(
                doc! {
                    "token": token,
                    "tokenType": token_type.as_str(),
                    "usedAt": null,
                    "supersededAt": null,
                    "expiresAt": { "$gt": at },
                },
                doc! { "$set": { "usedAt": at } },
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn purge_expired(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = self
            .tokens
            .delete_many(doc! { "expiresAt": { "$lt": bson::DateTime::from_chrono(older_than) } })
            .await?;
        Ok(result.deleted_count)
    }
}

/// In-process store. One mutex serialises issuance and mark-used.
#[derive(Clone, Default)]
pub struct MemoryVerificationTokenRepository {
    tokens: Arc<Mutex<Vec<VerificationToken>>>,
}

impl MemoryVerificationTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a token as-is, bypassing rate limiting and supersession.
    pub fn insert_raw(&self, token: VerificationToken) {
        self.tokens.lock().push(token);
    }

    pub fn all(&self) -> Vec<VerificationToken> {
        self.tokens.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

fn same_subject(a: &VerificationToken, b: &VerificationToken) -> bool {
    a.token_type == b.token_type && a.subject() == b.subject()
}

#[async_trait]
impl VerificationTokenRepository for MemoryVerificationTokenRepository {
    async fn issue(
        &self,
        token: &VerificationToken,
        window_start: DateTime<Utc>,
        max_in_window: u32,
    ) -> Result<IssueOutcome> {
        let mut tokens = self.tokens.lock();

        if tokens.iter().any(|t| t.token == token.token) {
            return Err(IdentityError::internal("Token value collision"));
        }

        let oldest = tokens
            .iter()
            .filter(|t| same_subject(t, token) && t.created_at >= window_start)
            .map(|t| t.created_at)
            .min();
        let in_window = tokens
            .iter()
            .filter(|t| same_subject(t, token) && t.created_at >= window_start)
            .count();

        if in_window >= max_in_window as usize {
            return Ok(IssueOutcome::RateLimited {
                oldest: oldest.unwrap_or(window_start),
            });
        }

        for existing in tokens
            .iter_mut()
            .filter(|t| same_subject(t, token) && !t.is_used() && !t.is_superseded())
        {
            existing.superseded_at = Some(token.created_at);
        }
        tokens.push(token.clone());
        Ok(IssueOutcome::Issued)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<VerificationToken>> {
        Ok(self.tokens.lock().iter().find(|t| t.token == token).cloned())
    }

    async fn mark_used(
        &self,
        token: &str,
        token_type: TokenType,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tokens = self.tokens.lock();
        match tokens
            .iter_mut()
            .find(|t| t.token == token && t.token_type == token_type)
        {
            Some(t) if t.is_valid_at(at) => {
                t.used_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|t| t.expires_at >= older_than);
        Ok((before - tokens.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_commit_retries_are_bounded() {
        assert!(retry_commit(true, 1));
        assert!(retry_commit(true, MAX_COMMIT_ATTEMPTS - 1));
        assert!(!retry_commit(true, MAX_COMMIT_ATTEMPTS));
        assert!(!retry_commit(false, 1));
    }

    fn token(value: &str, created_at: DateTime<Utc>) -> VerificationToken {
        VerificationToken::new(
            value,
            "U1",
            "u@x.test",
            TokenType::EmailVerification,
            created_at,
            created_at + Duration::hours(24),
        )
    }

    #[tokio::test]
    async fn test_issue_supersedes_previous_unused() {
        let repo = MemoryVerificationTokenRepository::new();
        let now = crate::shared::now();
        let window = now - Duration::hours(1);

        assert_eq!(repo.issue(&token("a", now), window, 3).await.unwrap(), IssueOutcome::Issued);
        assert_eq!(repo.issue(&token("b", now), window, 3).await.unwrap(), IssueOutcome::Issued);

        let a = repo.find_by_token("a").await.unwrap().unwrap();
        let b = repo.find_by_token("b").await.unwrap().unwrap();
        assert!(a.is_superseded());
        assert!(!b.is_superseded());
    }

    #[tokio::test]
    async fn test_window_counts_superseded_tokens() {
        let repo = MemoryVerificationTokenRepository::new();
        let now = crate::shared::now();
        let window = now - Duration::hours(1);
        let first = now - Duration::minutes(50);

        repo.insert_raw(token("a", first));
        repo.insert_raw(token("b", now - Duration::minutes(20)));
        repo.insert_raw(token("c", now - Duration::minutes(10)));

        let outcome = repo.issue(&token("d", now), window, 3).await.unwrap();
        assert_eq!(outcome, IssueOutcome::RateLimited { oldest: first });
        assert_eq!(repo.len(), 3);
    }

    #[tokio::test]
    async fn test_mark_used_only_once() {
        let repo = MemoryVerificationTokenRepository::new();
        let now = crate::shared::now();
        repo.insert_raw(token("a", now));

        assert!(repo.mark_used("a", TokenType::EmailVerification, now).await.unwrap());
        assert!(!repo.mark_used("a", TokenType::EmailVerification, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_used_rejects_wrong_type() {
        let repo = MemoryVerificationTokenRepository::new();
        let now = crate::shared::now();
        repo.insert_raw(token("a", now));
        assert!(!repo.mark_used("a", TokenType::PasswordReset, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let repo = MemoryVerificationTokenRepository::new();
        let now = crate::shared::now();
        repo.insert_raw(token("old", now - Duration::days(3)));
        repo.insert_raw(token("fresh", now));

        assert_eq!(repo.purge_expired(now).await.unwrap(), 1);
        assert!(repo.find_by_token("old").await.unwrap().is_none());
        assert!(repo.find_by_token("fresh").await.unwrap().is_some());
    }
}

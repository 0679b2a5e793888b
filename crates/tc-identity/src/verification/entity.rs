//! Verification Token Entity

use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenType {
    EmailVerification,
    PasswordReset,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailVerification => "EMAIL_VERIFICATION",
            Self::PasswordReset => "PASSWORD_RESET",
        }
    }

    /// Rate limiting and supersession key: the user id for email
    /// verification, the email address for password reset.
    pub fn subject<'a>(&self, user_id: &'a str, email: &'a str) -> &'a str {
        match self {
            Self::EmailVerification => user_id,
            Self::PasswordReset => email,
        }
    }

    /// Document field holding the subject
    pub fn subject_field(&self) -> &'static str {
        match self {
            Self::EmailVerification => "userId",
            Self::PasswordReset => "email",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationToken {
    #[serde(rename = "_id")]
    pub id: String,

    pub token: String,

    pub user_id: String,

    pub email: String,

    pub token_type: TokenType,

    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none", default, with = "bson::serde_helpers::chrono_datetime_as_bson_datetime_optional")]
    pub used_at: Option<DateTime<Utc>>,

    /// Set when a newer token for the same subject replaced this one.
    #[serde(skip_serializing_if = "Option::is_none", default, with = "bson::serde_helpers::chrono_datetime_as_bson_datetime_optional")]
    pub superseded_at: Option<DateTime<Utc>>,

    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl VerificationToken {
    pub fn new(
        token: impl Into<String>,
        user_id: impl Into<String>,
        email: impl Into<String>,
        token_type: TokenType,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: crate::TsidGenerator::generate(),
            token: token.into(),
            user_id: user_id.into(),
            email: email.into(),
            token_type,
            expires_at,
            used_at: None,
            superseded_at: None,
            created_at,
        }
    }

    pub fn subject(&self) -> &str {
        self.token_type.subject(&self.user_id, &self.email)
    }

    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_used() && !self.is_superseded() && !self.is_expired_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(token_type: TokenType) -> VerificationToken {
        let now = Utc::now();
        VerificationToken::new("abc", "U1", "u@x.test", token_type, now, now + Duration::hours(1))
    }

    #[test]
    fn test_subject_depends_on_type() {
        assert_eq!(token(TokenType::EmailVerification).subject(), "U1");
        assert_eq!(token(TokenType::PasswordReset).subject(), "u@x.test");
    }

    #[test]
    fn test_validity_predicate() {
        let now = Utc::now();
        let mut t = token(TokenType::EmailVerification);
        assert!(t.is_valid_at(now));
        assert!(!t.is_valid_at(t.expires_at));

        t.superseded_at = Some(now);
        assert!(!t.is_valid_at(now));

        t.superseded_at = None;
        t.used_at = Some(now);
        assert!(!t.is_valid_at(now));
    }

    #[test]
    fn test_token_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&TokenType::PasswordReset).unwrap(),
            "\"PASSWORD_RESET\""
        );
        assert_eq!(TokenType::EmailVerification.to_string(), "EMAIL_VERIFICATION");
    }
}

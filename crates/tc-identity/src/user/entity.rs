//! User Entity
//!
//! A person belonging to one tenant. Username and email are unique across
//! all tenants. Roles are embedded on the user document.

use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role assigned to a user. Only active roles contribute authorities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    /// Role name, e.g. `ADMIN` or `USER`
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Role {
    pub const ADMIN: &'static str = "ADMIN";
    pub const USER: &'static str = "USER";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: crate::TsidGenerator::generate(),
            name: name.into(),
            is_active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,

    pub tenant_id: String,

    pub username: String,

    pub email: String,

    /// Argon2id PHC string
    pub password_hash: String,

    #[serde(default)]
    pub first_name: String,

    #[serde(default)]
    pub last_name: String,

    #[serde(default)]
    pub is_active: bool,

    #[serde(default)]
    pub is_email_verified: bool,

    #[serde(skip_serializing_if = "Option::is_none", default, with = "bson::serde_helpers::chrono_datetime_as_bson_datetime_optional")]
    pub last_login_at: Option<DateTime<Utc>>,

    /// Ordered; duplicates by name are tolerated and collapsed when deriving
    /// authorities.
    #[serde(default)]
    pub roles: Vec<Role>,

    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl User {
    /// New users start inactive and unverified.
    pub fn new(
        tenant_id: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        let now = crate::shared::now();
        Self {
            id: crate::TsidGenerator::generate(),
            tenant_id: tenant_id.into(),
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            first_name: String::new(),
            last_name: String::new(),
            is_active: false,
            is_email_verified: false,
            last_login_at: None,
            roles: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        self.first_name = first_name.into();
        self.last_name = last_name.into();
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }

    pub fn display_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (true, true) => self.username.clone(),
            (false, true) => self.first_name.clone(),
            (true, false) => self.last_name.clone(),
            (false, false) => format!("{} {}", self.first_name, self.last_name),
        }
    }

    /// Email confirmed: the account becomes usable.
    pub fn verify_email(&mut self) {
        self.is_email_verified = true;
        self.is_active = true;
        self.updated_at = crate::shared::now();
    }

    pub fn set_password_hash(&mut self, hash: impl Into<String>) {
        self.password_hash = hash.into();
        self.updated_at = crate::shared::now();
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles
            .iter()
            .any(|r| r.is_active && r.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_is_inactive_and_unverified() {
        let user = User::new("T1", "alice", "alice@acme.test", "hash");
        assert!(!user.is_active);
        assert!(!user.is_email_verified);
        assert!(user.last_login_at.is_none());
    }

    #[test]
    fn test_verify_email_activates() {
        let mut user = User::new("T1", "alice", "alice@acme.test", "hash");
        user.verify_email();
        assert!(user.is_active);
        assert!(user.is_email_verified);
    }

    #[test]
    fn test_has_role_ignores_inactive() {
        let user = User::new("T1", "alice", "alice@acme.test", "hash")
            .with_role(Role::new("ADMIN").inactive())
            .with_role(Role::new("USER"));
        assert!(!user.has_role("admin"));
        assert!(user.has_role("user"));
    }

    #[test]
    fn test_display_name() {
        let user = User::new("T1", "alice", "a@x.test", "h").with_name("Alice", "Smith");
        assert_eq!(user.display_name(), "Alice Smith");
        let bare = User::new("T1", "bob", "b@x.test", "h");
        assert_eq!(bare.display_name(), "bob");
    }

    #[test]
    fn test_json_round_trip_keeps_timestamps() {
        let mut user = User::new("T1", "alice", "a@x.test", "h");
        user.last_login_at = Some(Utc::now());
        let json = serde_json::to_string(&user).unwrap();
        let back: User = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, user.id);
        assert_eq!(
            back.last_login_at.map(|t| t.timestamp_millis()),
            user.last_login_at.map(|t| t.timestamp_millis())
        );
    }
}

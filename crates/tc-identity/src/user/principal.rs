//! Authenticated principal view of a user

use super::entity::{Role, User};

pub const DEFAULT_AUTHORITY: &str = "ROLE_USER";

/// What the authorization server needs to know about a resolved user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPrincipal {
    user_id: String,
    tenant_id: String,
    username: String,
    email: String,
    password_hash: String,
    enabled: bool,
    email_verified: bool,
    authorities: Vec<String>,
}

impl UserPrincipal {
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            tenant_id: user.tenant_id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            enabled: user.is_active,
            email_verified: user.is_email_verified,
            authorities: derive_authorities(&user.roles),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }

    pub fn authorities(&self) -> &[String] {
        &self.authorities
    }

    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a == authority)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_email_verified(&self) -> bool {
        self.email_verified
    }

    pub fn is_account_non_locked(&self) -> bool {
        true
    }

    pub fn is_account_non_expired(&self) -> bool {
        true
    }

    pub fn is_credentials_non_expired(&self) -> bool {
        true
    }
}

/// `ROLE_<NAME>` for each active role in order, de-duplicated. A user with
/// no active roles gets `ROLE_USER`.
pub fn derive_authorities(roles: &[Role]) -> Vec<String> {
    let mut authorities: Vec<String> = Vec::new();
    for role in roles.iter().filter(|r| r.is_active) {
        let authority = format!("ROLE_{}", role.name.trim().to_uppercase());
        if !authorities.contains(&authority) {
            authorities.push(authority);
        }
    }
    if authorities.is_empty() {
        authorities.push(DEFAULT_AUTHORITY.to_string());
    }
    authorities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_roles_defaults_to_role_user() {
        assert_eq!(derive_authorities(&[]), vec!["ROLE_USER"]);
    }

    #[test]
    fn test_only_inactive_roles_defaults_to_role_user() {
        let roles = vec![Role::new("ADMIN").inactive()];
        assert_eq!(derive_authorities(&roles), vec!["ROLE_USER"]);
    }

    #[test]
    fn test_active_roles_upper_cased_deduplicated_in_order() {
        let roles = vec![
            Role::new("editor"),
            Role::new("ADMIN"),
            Role::new("auditor").inactive(),
            Role::new("Editor"),
        ];
        assert_eq!(derive_authorities(&roles), vec!["ROLE_EDITOR", "ROLE_ADMIN"]);
    }

    #[test]
    fn test_principal_reflects_user_state() {
        let mut user = User::new("T1", "alice", "alice@acme.test", "hash").with_role(Role::new("ADMIN"));
        user.verify_email();
        let principal = UserPrincipal::from_user(&user);
        assert!(principal.is_enabled());
        assert!(principal.is_email_verified());
        assert!(principal.has_authority("ROLE_ADMIN"));
        assert_eq!(principal.tenant_id(), "T1");
    }
}

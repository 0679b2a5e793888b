//! User Identity Service
//!
//! Resolves principals for authentication and owns the user lifecycle
//! (registration, email verification, password changes). Lookups read
//! through the cache; every mutation evicts before repopulating.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::entity::{Role, User};
use super::password_service::PasswordService;
use super::principal::UserPrincipal;
use super::repository::UserRepository;
use crate::cache::CacheLayer;
use crate::shared::error::{IdentityError, Result};

/// Registration input
#[derive(Debug, Clone)]
pub struct NewUser {
    pub tenant_id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

impl NewUser {
    pub fn new(
        tenant_id: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            username: username.into(),
            email: email.into(),
            password: password.into(),
            first_name: String::new(),
            last_name: String::new(),
        }
    }

    pub fn with_name(mut self, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        self.first_name = first_name.into();
        self.last_name = last_name.into();
        self
    }
}

pub struct UserIdentityService {
    repository: Arc<dyn UserRepository>,
    cache: CacheLayer,
    passwords: Arc<PasswordService>,
}

impl UserIdentityService {
    pub fn new(
        repository: Arc<dyn UserRepository>,
        cache: CacheLayer,
        passwords: Arc<PasswordService>,
    ) -> Self {
        Self {
            repository,
            cache,
            passwords,
        }
    }

    /// Resolve an active user by username. Inactive and unknown users are
    /// both reported as `NotFound`.
    pub async fn resolve_principal(&self, username: &str) -> Result<UserPrincipal> {
        let username = username.trim();
        let user = match self.cache.get_user_by_username(username).await {
            Some(user) => user,
            None => {
                let user = self
                    .repository
                    .find_by_username(username)
                    .await?
                    .ok_or_else(|| IdentityError::not_found("User", username))?;
                self.cache.put_user(&user).await;
                user
            }
        };
        self.authenticated(user, username)
    }

    pub async fn resolve_principal_by_email(&self, email: &str) -> Result<UserPrincipal> {
        let email = normalize_email(email);
        let user = match self.cache.get_user_by_email(&email).await {
            Some(user) => user,
            None => {
                let user = self
                    .repository
                    .find_by_email(&email)
                    .await?
                    .ok_or_else(|| IdentityError::not_found("User", &email))?;
                self.cache.put_user(&user).await;
                user
            }
        };
        self.authenticated(user, &email)
    }

    fn authenticated(&self, user: User, lookup: &str) -> Result<UserPrincipal> {
        if !user.is_active {
            debug!(user_id = %user.id, "Resolved user is inactive");
            return Err(IdentityError::not_found("User", lookup));
        }
        let principal = UserPrincipal::from_user(&user);
        self.record_login(user.id);
        Ok(principal)
    }

    /// Fire-and-forget. The cached copy keeps its old `lastLoginAt`.
    fn record_login(&self, user_id: String) {
        let repository = Arc::clone(&self.repository);
        tokio::spawn(async move {
            if let Err(e) = repository
                .update_last_login(&user_id, crate::shared::now())
                .await
            {
                warn!(user_id = %user_id, error = %e, "Failed to record last login");
            }
        });
    }

    pub async fn register_user(&self, new_user: NewUser) -> Result<User> {
        let username = new_user.username.trim().to_string();
        let email = normalize_email(&new_user.email);

        if username.is_empty() {
            return Err(IdentityError::validation("Username cannot be empty"));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(IdentityError::validation("Email address is invalid"));
        }

        if self.repository.find_by_username(&username).await?.is_some() {
            return Err(IdentityError::conflict("User", "username", &username));
        }
        if self.repository.find_by_email(&email).await?.is_some() {
            return Err(IdentityError::conflict("User", "email", &email));
        }

        let hash = self.passwords.hash_password(&new_user.password)?;
        let user = User::new(&new_user.tenant_id, username, email, hash)
            .with_name(new_user.first_name, new_user.last_name)
            .with_role(Role::new(Role::USER));

        self.repository.insert(&user).await?;
        self.cache.evict_tenant_users(&user.tenant_id).await;

        info!(user_id = %user.id, tenant_id = %user.tenant_id, "User registered");
        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        if let Some(user) = self.cache.get_user(id).await {
            return Ok(user);
        }
        let user = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| IdentityError::not_found("User", id))?;
        self.cache.put_user(&user).await;
        Ok(user)
    }

    pub async fn list_tenant_users(&self, tenant_id: &str) -> Result<Vec<User>> {
        if let Some(users) = self.cache.get_tenant_users(tenant_id).await {
            return Ok(users);
        }
        let users = self.repository.find_by_tenant(tenant_id).await?;
        self.cache.put_tenant_users(tenant_id, &users).await;
        Ok(users)
    }

    /// Verifies the email address and activates the account.
    pub async fn mark_email_verified(&self, user_id: &str) -> Result<User> {
        let mut user = self
            .repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| IdentityError::not_found("User", user_id))?;

        user.verify_email();
        self.repository.update(&user).await?;

        self.cache.evict_user(&user).await;
        self.cache.evict_tenant_users(&user.tenant_id).await;
        self.cache.put_user(&user).await;

        info!(user_id = %user.id, "Email verified");
        Ok(user)
    }

    pub async fn update_password(&self, user_id: &str, new_password: &str) -> Result<()> {
        let mut user = self
            .repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| IdentityError::not_found("User", user_id))?;

        let hash = self.passwords.hash_password(new_password)?;
        user.set_password_hash(hash);
        self.repository.update(&user).await?;

        self.cache.evict_user(&user).await;
        self.cache.evict_tenant_users(&user.tenant_id).await;

        info!(user_id = %user.id, "Password updated");
        Ok(())
    }

    pub fn verify_password(&self, principal: &UserPrincipal, password: &str) -> Result<bool> {
        self.passwords.verify_password(password, principal.password_hash())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

//! Cache Layer
//!
//! Cache-aside wrapper over tenant and user records. Callers read through
//! (`get_*`, on miss load from storage then `put_*`) and evict on every
//! mutation before caching the new value.
//!
//! Natural-key entries (`tenant:api:<key>`, `user:email:<email>`, ...) hold
//! only the owning id; the record itself lives under the id key.
//!
//! The cache is never authoritative. Store failures are logged at `warn`,
//! reads degrade to a miss and writes are dropped.

mod store;

pub use store::{CacheStore, MemoryCacheStore, RedisCacheStore};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Tenant, User};

/// Cache key formats
pub mod keys {
    pub fn tenant(id: &str) -> String {
        format!("tenant:{}", id)
    }

    pub fn tenant_by_api_key(api_key: &str) -> String {
        format!("tenant:api:{}", api_key)
    }

    pub fn tenant_by_domain(domain: &str) -> String {
        format!("tenant:domain:{}", domain)
    }

    pub fn tenant_users(tenant_id: &str) -> String {
        format!("tenant:users:{}", tenant_id)
    }

    pub fn user(id: &str) -> String {
        format!("user:{}", id)
    }

    pub fn user_by_email(email: &str) -> String {
        format!("user:email:{}", email)
    }

    pub fn user_by_username(username: &str) -> String {
        format!("user:username:{}", username)
    }

    pub fn oauth_client(id: &str) -> String {
        format!("oauth_client:{}", id)
    }

    pub fn oauth_client_by_client_id(client_id: &str) -> String {
        format!("oauth_client:client_id:{}", client_id)
    }

    /// Written by the billing service; read-only here.
    pub const FREE_TIER_PLAN: &str = "plan:free_tier";
}

/// Entry lifetimes
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub default: Duration,
    pub api_key: Duration,
    pub tenant_users: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(1800),     // 30 minutes
            api_key: Duration::from_secs(3600),     // 1 hour
            tenant_users: Duration::from_secs(900), // 15 minutes
        }
    }
}

impl CacheTtls {
    pub fn from_secs(default: u64, api_key: u64, tenant_users: u64) -> Self {
        Self {
            default: Duration::from_secs(default),
            api_key: Duration::from_secs(api_key),
            tenant_users: Duration::from_secs(tenant_users),
        }
    }
}

#[derive(Clone)]
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    ttls: CacheTtls,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>, ttls: CacheTtls) -> Self {
        Self { store, ttls }
    }

    /// In-process cache with default TTLs.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), CacheTtls::default())
    }

    pub fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    // ------------------------------------------------------------------------
    // Tenants
    // ------------------------------------------------------------------------

    pub async fn get_tenant(&self, id: &str) -> Option<Tenant> {
        self.get_json(&keys::tenant(id)).await
    }

    pub async fn get_tenant_by_api_key(&self, api_key: &str) -> Option<Tenant> {
        let id = self.get_raw(&keys::tenant_by_api_key(api_key)).await?;
        self.get_tenant(&id)
            .await
            .filter(|t| t.api_key == api_key)
    }

    pub async fn get_tenant_by_domain(&self, domain: &str) -> Option<Tenant> {
        let id = self.get_raw(&keys::tenant_by_domain(domain)).await?;
        self.get_tenant(&id)
            .await
            .filter(|t| t.domain == domain)
    }

    pub async fn put_tenant(&self, tenant: &Tenant) {
        self.set_json(&keys::tenant(&tenant.id), tenant, self.ttls.default)
            .await;
        self.set_raw(
            &keys::tenant_by_api_key(&tenant.api_key),
            &tenant.id,
            self.ttls.api_key,
        )
        .await;
        self.set_raw(
            &keys::tenant_by_domain(&tenant.domain),
            &tenant.id,
            self.ttls.default,
        )
        .await;
    }

    /// Evict the tenant and every alias of both the given record and the
    /// currently cached copy (their natural keys may differ).
    pub async fn evict_tenant(&self, tenant: &Tenant) {
        let mut doomed = tenant_keys(tenant);
        if let Some(cached) = self.get_tenant(&tenant.id).await {
            doomed.extend(tenant_keys(&cached));
        }
        self.delete(&doomed).await;
    }

    /// Evict by id when only the id is known; aliases are discovered from
    /// the cached copy.
    pub async fn evict_tenant_by_id(&self, id: &str) {
        let mut doomed = vec![keys::tenant(id)];
        if let Some(cached) = self.get_tenant(id).await {
            doomed.extend(tenant_keys(&cached));
        }
        self.delete(&doomed).await;
    }

    // ------------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------------

    pub async fn get_user(&self, id: &str) -> Option<User> {
        self.get_json(&keys::user(id)).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Option<User> {
        let id = self.get_raw(&keys::user_by_email(email)).await?;
        self.get_user(&id).await.filter(|u| u.email == email)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Option<User> {
        let id = self.get_raw(&keys::user_by_username(username)).await?;
        self.get_user(&id).await.filter(|u| u.username == username)
    }

    pub async fn put_user(&self, user: &User) {
        self.set_json(&keys::user(&user.id), user, self.ttls.default)
            .await;
        self.set_raw(&keys::user_by_email(&user.email), &user.id, self.ttls.default)
            .await;
        self.set_raw(
            &keys::user_by_username(&user.username),
            &user.id,
            self.ttls.default,
        )
        .await;
    }

    pub async fn evict_user(&self, user: &User) {
        let mut doomed = user_keys(user);
        if let Some(cached) = self.get_user(&user.id).await {
            doomed.extend(user_keys(&cached));
        }
        self.delete(&doomed).await;
    }

    pub async fn get_tenant_users(&self, tenant_id: &str) -> Option<Vec<User>> {
        self.get_json(&keys::tenant_users(tenant_id)).await
    }

    pub async fn put_tenant_users(&self, tenant_id: &str, users: &[User]) {
        self.set_json(&keys::tenant_users(tenant_id), &users, self.ttls.tenant_users)
            .await;
    }

    pub async fn evict_tenant_users(&self, tenant_id: &str) {
        self.delete(&[keys::tenant_users(tenant_id)]).await;
    }

    // ------------------------------------------------------------------------
    // Generic primitives
    // ------------------------------------------------------------------------

    /// Read a raw string entry. Errors degrade to a miss.
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => {
                debug!(key, hit = value.is_some(), "Cache lookup");
                value
            }
            Err(e) => {
                record_failure("get", key, &e);
                None
            }
        }
    }

    pub async fn set_raw(&self, key: &str, value: &str, ttl: Duration) {
        if let Err(e) = self.store.set(key, value, ttl).await {
            record_failure("set", key, &e);
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                self.delete(&[key.to_string()]).await;
                None
            }
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(json) => self.set_raw(key, &json, ttl).await,
            Err(e) => warn!(key, error = %e, "Failed to encode cache entry"),
        }
    }

    pub async fn delete(&self, keys: &[String]) {
        if let Err(e) = self.store.delete(keys).await {
            record_failure("delete", &keys.join(","), &e);
        }
    }
}

fn tenant_keys(tenant: &Tenant) -> Vec<String> {
    vec![
        keys::tenant(&tenant.id),
        keys::tenant_by_api_key(&tenant.api_key),
        keys::tenant_by_domain(&tenant.domain),
    ]
}

fn user_keys(user: &User) -> Vec<String> {
    vec![
        keys::user(&user.id),
        keys::user_by_email(&user.email),
        keys::user_by_username(&user.username),
    ]
}

fn record_failure(op: &'static str, key: &str, error: &crate::IdentityError) {
    metrics::counter!("cache.errors_total").increment(1);
    warn!(op, key, error = %error, "Cache operation failed, continuing without cache");
}

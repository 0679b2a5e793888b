//! Tenant Provisioning Service
//!
//! Creates tenants with a globally unique API key and keeps tenant billing
//! state current. After the tenant is stored:
//!
//! 1. default settings are created; on failure the tenant row is deleted
//!    again and the call fails with `UpstreamUnavailable`
//! 2. the tenant is cached (best-effort)
//! 3. the `user_created` provisioning event is published (best-effort)
//! 4. the widget provisioning signal is published (best-effort)

use std::sync::Arc;
use tracing::{error, info, warn};

use super::api_key::generate_api_key;
use super::entity::Tenant;
use super::repository::TenantRepository;
use crate::cache::CacheLayer;
use crate::collaborators::{BillingClient, SettingsService};
use crate::events::ProvisioningEvents;
use crate::shared::error::{IdentityError, Result};

/// Default bound on API key regeneration attempts
pub const DEFAULT_MAX_API_KEY_ATTEMPTS: u32 = 10;

pub struct TenantProvisioningService {
    repository: Arc<dyn TenantRepository>,
    cache: CacheLayer,
    billing: Arc<dyn BillingClient>,
    settings: Arc<dyn SettingsService>,
    events: Option<ProvisioningEvents>,
    max_api_key_attempts: u32,
}

impl TenantProvisioningService {
    pub fn new(
        repository: Arc<dyn TenantRepository>,
        cache: CacheLayer,
        billing: Arc<dyn BillingClient>,
        settings: Arc<dyn SettingsService>,
    ) -> Self {
        Self {
            repository,
            cache,
            billing,
            settings,
            events: None,
            max_api_key_attempts: DEFAULT_MAX_API_KEY_ATTEMPTS,
        }
    }

    pub fn with_events(mut self, events: ProvisioningEvents) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_max_api_key_attempts(mut self, attempts: u32) -> Self {
        self.max_api_key_attempts = attempts.max(1);
        self
    }

    pub async fn create_tenant(
        &self,
        name: &str,
        domain: &str,
        description: Option<&str>,
    ) -> Result<Tenant> {
        let name = name.trim();
        let domain = normalize_domain(domain);

        if name.is_empty() {
            return Err(IdentityError::validation("Tenant name cannot be empty"));
        }
        if domain.is_empty() {
            return Err(IdentityError::validation("Tenant domain cannot be empty"));
        }

        if self.repository.find_by_name(name).await?.is_some() {
            return Err(IdentityError::conflict("Tenant", "name", name));
        }
        if self.repository.find_by_domain(&domain).await?.is_some() {
            return Err(IdentityError::conflict("Tenant", "domain", &domain));
        }

        let api_key = self.unique_api_key().await?;
        let plan_id = self.free_tier_plan().await;

        let tenant = Tenant::new(name, domain, api_key)
            .with_description(
                description
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string),
            )
            .with_plan(plan_id);

        // The unique indexes close the race between the checks above and here
        self.repository.insert(&tenant).await?;

        if let Err(e) = self.settings.create_default_settings(&tenant.id).await {
            error!(tenant_id = %tenant.id, error = %e, "Failed to create default tenant settings");
            self.rollback(&tenant).await;
            return Err(match e {
                upstream @ IdentityError::UpstreamUnavailable { .. } => upstream,
                other => IdentityError::upstream("settings", other.to_string()),
            });
        }

        self.cache.evict_tenant(&tenant).await;
        self.cache.put_tenant(&tenant).await;

        if let Some(events) = &self.events {
            if let Err(e) = events.publish_user_created(&tenant).await {
                warn!(tenant_id = %tenant.id, error = %e, "Failed to publish user_created event");
            }
            if let Err(e) = events.publish_widget_provision(&tenant.id).await {
                warn!(tenant_id = %tenant.id, error = %e, "Failed to publish widget provisioning signal");
            }
        }

        metrics::counter!("tenants.provisioned_total").increment(1);
        info!(
            tenant_id = %tenant.id,
            name = %tenant.name,
            domain = %tenant.domain,
            plan_id = ?tenant.plan_id,
            "Tenant provisioned"
        );

        Ok(tenant)
    }

    /// Undo the insert of a tenant whose settings could not be created, so
    /// the same name and domain can be provisioned again.
    async fn rollback(&self, tenant: &Tenant) {
        match self.repository.delete(&tenant.id).await {
            Ok(_) => info!(tenant_id = %tenant.id, "Rolled back partially provisioned tenant"),
            Err(e) => error!(
                tenant_id = %tenant.id,
                error = %e,
                "Failed to roll back partially provisioned tenant"
            ),
        }
        self.cache.evict_tenant(tenant).await;
    }

    /// Returns `false` if the tenant does not exist.
    pub async fn update_tenant_plan(&self, tenant_id: &str, plan_id: &str) -> Result<bool> {
        match self.repository.update_billing(tenant_id, plan_id, None).await? {
            Some(tenant) => {
                self.cache.evict_tenant(&tenant).await;
                info!(tenant_id, plan_id, "Tenant plan updated");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Returns `false` if the tenant does not exist.
    pub async fn update_tenant_subscription(
        &self,
        tenant_id: &str,
        subscription_id: &str,
        plan_id: &str,
    ) -> Result<bool> {
        match self
            .repository
            .update_billing(tenant_id, plan_id, Some(subscription_id))
            .await?
        {
            Some(tenant) => {
                self.cache.evict_tenant(&tenant).await;
                info!(tenant_id, subscription_id, plan_id, "Tenant subscription updated");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_tenant(&self, id: &str) -> Result<Tenant> {
        if let Some(tenant) = self.cache.get_tenant(id).await {
            return Ok(tenant);
        }
        let tenant = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| IdentityError::not_found("Tenant", id))?;
        self.cache.put_tenant(&tenant).await;
        Ok(tenant)
    }

    pub async fn get_tenant_by_api_key(&self, api_key: &str) -> Result<Tenant> {
        if let Some(tenant) = self.cache.get_tenant_by_api_key(api_key).await {
            return Ok(tenant);
        }
        let tenant = self
            .repository
            .find_by_api_key(api_key)
            .await?
            .ok_or_else(|| IdentityError::not_found("Tenant", "<api key>"))?;
        self.cache.put_tenant(&tenant).await;
        Ok(tenant)
    }

    pub async fn get_tenant_by_domain(&self, domain: &str) -> Result<Tenant> {
        let domain = normalize_domain(domain);
        if let Some(tenant) = self.cache.get_tenant_by_domain(&domain).await {
            return Ok(tenant);
        }
        let tenant = self
            .repository
            .find_by_domain(&domain)
            .await?
            .ok_or_else(|| IdentityError::not_found("Tenant", &domain))?;
        self.cache.put_tenant(&tenant).await;
        Ok(tenant)
    }

    /// Tenants are never deleted. Returns `false` if the tenant does not
    /// exist.
    pub async fn deactivate_tenant(&self, tenant_id: &str) -> Result<bool> {
        match self.repository.set_active(tenant_id, false).await? {
            Some(tenant) => {
                self.cache.evict_tenant(&tenant).await;
                info!(tenant_id, "Tenant deactivated");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn unique_api_key(&self) -> Result<String> {
        for attempt in 1..=self.max_api_key_attempts {
            let candidate = generate_api_key();
            if !self.repository.exists_by_api_key(&candidate).await? {
                return Ok(candidate);
            }
            warn!(attempt, "Generated API key already in use, regenerating");
        }
        Err(IdentityError::internal(format!(
            "Could not generate a unique API key after {} attempts",
            self.max_api_key_attempts
        )))
    }

    async fn free_tier_plan(&self) -> Option<String> {
        match self.billing.free_tier_plan_id().await {
            Ok(plan_id) => plan_id,
            Err(e) => {
                warn!(error = %e, "Free-tier plan lookup failed, provisioning without a plan");
                None
            }
        }
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemorySettingsService;
    use crate::tenant::repository::MemoryTenantRepository;
    use async_trait::async_trait;

    struct FixedBilling(Option<&'static str>);

    #[async_trait]
    impl BillingClient for FixedBilling {
        async fn free_tier_plan_id(&self) -> Result<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    /// Reports every key as taken.
    struct SaturatedRepository(MemoryTenantRepository);

    #[async_trait]
    impl TenantRepository for SaturatedRepository {
        async fn find_by_id(&self, id: &str) -> Result<Option<Tenant>> {
            self.0.find_by_id(id).await
        }
        async fn find_by_name(&self, name: &str) -> Result<Option<Tenant>> {
            self.0.find_by_name(name).await
        }
        async fn find_by_domain(&self, domain: &str) -> Result<Option<Tenant>> {
            self.0.find_by_domain(domain).await
        }
        async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Tenant>> {
            self.0.find_by_api_key(api_key).await
        }
        async fn exists_by_api_key(&self, _api_key: &str) -> Result<bool> {
            Ok(true)
        }
        async fn insert(&self, tenant: &Tenant) -> Result<()> {
            self.0.insert(tenant).await
        }
        async fn update_billing(
            &self,
            id: &str,
            plan_id: &str,
            subscription_id: Option<&str>,
        ) -> Result<Option<Tenant>> {
            self.0.update_billing(id, plan_id, subscription_id).await
        }
        async fn set_active(&self, id: &str, active: bool) -> Result<Option<Tenant>> {
            self.0.set_active(id, active).await
        }
        async fn delete(&self, id: &str) -> Result<bool> {
            self.0.delete(id).await
        }
    }

    fn service(repo: Arc<dyn TenantRepository>) -> TenantProvisioningService {
        TenantProvisioningService::new(
            repo,
            CacheLayer::in_memory(),
            Arc::new(FixedBilling(Some("plan_free"))),
            Arc::new(MemorySettingsService::new()),
        )
    }

    #[tokio::test]
    async fn test_normalises_input() {
        let svc = service(Arc::new(MemoryTenantRepository::new()));
        let tenant = svc
            .create_tenant("  Acme  ", " ACME.Test ", Some("  "))
            .await
            .unwrap();
        assert_eq!(tenant.name, "Acme");
        assert_eq!(tenant.domain, "acme.test");
        assert_eq!(tenant.description, None);
        assert_eq!(tenant.plan_id.as_deref(), Some("plan_free"));
    }

    #[tokio::test]
    async fn test_empty_fields_are_validation_errors() {
        let svc = service(Arc::new(MemoryTenantRepository::new()));
        assert!(matches!(
            svc.create_tenant(" ", "acme.test", None).await,
            Err(IdentityError::Validation { .. })
        ));
        assert!(matches!(
            svc.create_tenant("Acme", "   ", None).await,
            Err(IdentityError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_api_key_attempts_are_bounded() {
        let svc = service(Arc::new(SaturatedRepository(MemoryTenantRepository::new())))
            .with_max_api_key_attempts(3);
        let err = svc.create_tenant("Acme", "acme.test", None).await.unwrap_err();
        assert!(matches!(err, IdentityError::Internal { .. }));
    }

    #[tokio::test]
    async fn test_lookup_by_domain_is_case_insensitive() {
        let svc = service(Arc::new(MemoryTenantRepository::new()));
        let created = svc.create_tenant("Acme", "acme.test", None).await.unwrap();
        let found = svc.get_tenant_by_domain("ACME.TEST").await.unwrap();
        assert_eq!(found.id, created.id);
    }
}

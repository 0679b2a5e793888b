//! Tenant Repository

use async_trait::async_trait;
use mongodb::{
    bson::{doc, Document},
    options::ReturnDocument,
    Collection, Database,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::entity::Tenant;
use crate::shared::error::{is_duplicate_key_error, IdentityError, Result};
use crate::shared::indexes::TENANTS;

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Tenant>>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Tenant>>;

    async fn find_by_domain(&self, domain: &str) -> Result<Option<Tenant>>;

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Tenant>>;

    async fn exists_by_api_key(&self, api_key: &str) -> Result<bool>;

    /// Fails with `Conflict` naming the field when a unique index rejects
    /// the tenant.
    async fn insert(&self, tenant: &Tenant) -> Result<()>;

    /// Set the plan (and the subscription, when given). Returns the updated
    /// tenant, or `None` if no tenant has that id.
    async fn update_billing(
        &self,
        id: &str,
        plan_id: &str,
        subscription_id: Option<&str>,
    ) -> Result<Option<Tenant>>;

    /// Returns the updated tenant, or `None` if no tenant has that id.
    async fn set_active(&self, id: &str, active: bool) -> Result<Option<Tenant>>;

    /// Remove a tenant that never finished provisioning. Returns `false` if
    /// no tenant has that id.
    async fn delete(&self, id: &str) -> Result<bool>;
}

pub struct MongoTenantRepository {
    collection: Collection<Tenant>,
}

impl MongoTenantRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(TENANTS),
        }
    }

    async fn update_returning(&self, id: &str, set: Document) -> Result<Option<Tenant>> {
        Ok(self
            .collection
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await?)
    }
}

/// Which unique field a duplicate-key error refers to, from the index name
/// in the server message (e.g. `index: domain_1`).
fn conflicting_field(error: &mongodb::error::Error) -> &'static str {
    let message = error.to_string();
    if message.contains("apiKey") {
        "apiKey"
    } else if message.contains("domain") {
        "domain"
    } else {
        "name"
    }
}

#[async_trait]
impl TenantRepository for MongoTenantRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Tenant>> {
        Ok(self.collection.find_one(doc! { "_id": id }).await?)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Tenant>> {
        Ok(self.collection.find_one(doc! { "name": name }).await?)
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Option<Tenant>> {
        Ok(self.collection.find_one(doc! { "domain": domain }).await?)
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Tenant>> {
        Ok(self.collection.find_one(doc! { "apiKey": api_key }).await?)
    }

    async fn exists_by_api_key(&self, api_key: &str) -> Result<bool> {
        let count = self
            .collection
            .count_documents(doc! { "apiKey": api_key })
            .await?;
        Ok(count > 0)
    }

    async fn insert(&self, tenant: &Tenant) -> Result<()> {
        self.collection.insert_one(tenant).await.map_err(|e| {
            if is_duplicate_key_error(&e) {
                let field = conflicting_field(&e);
                let value = match field {
                    "apiKey" => "<redacted>".to_string(),
                    "domain" => tenant.domain.clone(),
                    _ => tenant.name.clone(),
                };
                IdentityError::conflict("Tenant", field, value)
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn update_billing(
        &self,
        id: &str,
        plan_id: &str,
        subscription_id: Option<&str>,
    ) -> Result<Option<Tenant>> {
        let mut set = doc! {
            "planId": plan_id,
            "updatedAt": bson::DateTime::from_chrono(crate::shared::now()),
        };
        if let Some(subscription_id) = subscription_id {
            set.insert("subscriptionId", subscription_id);
        }
        self.update_returning(id, set).await
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<Option<Tenant>> {
        self.update_returning(
            id,
            doc! {
                "isActive": active,
                "updatedAt": bson::DateTime::from_chrono(crate::shared::now()),
            },
        )
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = self.collection.delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count > 0)
    }
}

/// In-process repository enforcing the same unique fields as the MongoDB
/// indexes.
#[derive(Clone, Default)]
pub struct MemoryTenantRepository {
    tenants: Arc<RwLock<HashMap<String, Tenant>>>,
}

impl MemoryTenantRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.read().is_empty()
    }

    pub fn all(&self) -> Vec<Tenant> {
        self.tenants.read().values().cloned().collect()
    }

    fn update_with(&self, id: &str, f: impl FnOnce(&mut Tenant)) -> Option<Tenant> {
        let mut tenants = self.tenants.write();
        let tenant = tenants.get_mut(id)?;
        f(tenant);
        tenant.updated_at = crate::shared::now();
        Some(tenant.clone())
    }
}

#[async_trait]
impl TenantRepository for MemoryTenantRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Tenant>> {
        Ok(self.tenants.read().get(id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Tenant>> {
        Ok(self.tenants.read().values().find(|t| t.name == name).cloned())
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Option<Tenant>> {
        Ok(self.tenants.read().values().find(|t| t.domain == domain).cloned())
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Tenant>> {
        Ok(self.tenants.read().values().find(|t| t.api_key == api_key).cloned())
    }

    async fn exists_by_api_key(&self, api_key: &str) -> Result<bool> {
        Ok(self.tenants.read().values().any(|t| t.api_key == api_key))
    }

    async fn insert(&self, tenant: &Tenant) -> Result<()> {
        let mut tenants = self.tenants.write();
        for existing in tenants.values() {
            if existing.name == tenant.name {
                return Err(IdentityError::conflict("Tenant", "name", &tenant.name));
            }
            if existing.domain == tenant.domain {
                return Err(IdentityError::conflict("Tenant", "domain", &tenant.domain));
            }
            if existing.api_key == tenant.api_key {
                return Err(IdentityError::conflict("Tenant", "apiKey", "<redacted>"));
            }
        }
        tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(())
    }

    async fn update_billing(
        &self,
        id: &str,
        plan_id: &str,
        subscription_id: Option<&str>,
    ) -> Result<Option<Tenant>> {
        Ok(self.update_with(id, |t| {
            t.plan_id = Some(plan_id.to_string());
            if let Some(subscription_id) = subscription_id {
                t.subscription_id = Some(subscription_id.to_string());
            }
        }))
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<Option<Tenant>> {
        Ok(self.update_with(id, |t| t.is_active = active))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.tenants.write().remove(id).is_some())
    }
}

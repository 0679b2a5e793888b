//! Tenant settings collaborator
//!
//! Per-tenant presentation settings, stored in `tenant_settings`. Creating
//! the defaults is part of provisioning and its failure is fatal there.

use async_trait::async_trait;
use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use mongodb::{bson::doc, Collection, Database};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::shared::error::{is_duplicate_key_error, IdentityError, Result};
use crate::shared::indexes::TENANT_SETTINGS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSettings {
    #[serde(rename = "_id")]
    pub id: String,

    pub tenant_id: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub logo_url: Option<String>,

    #[serde(default = "default_primary_color")]
    pub primary_color: String,

    #[serde(default = "default_locale")]
    pub locale: String,

    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

fn default_primary_color() -> String {
    "#1F6FEB".to_string()
}

fn default_locale() -> String {
    "en".to_string()
}

impl TenantSettings {
    pub fn defaults_for(tenant_id: impl Into<String>) -> Self {
        let now = crate::shared::now();
        Self {
            id: crate::TsidGenerator::generate(),
            tenant_id: tenant_id.into(),
            logo_url: None,
            primary_color: default_primary_color(),
            locale: default_locale(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait SettingsService: Send + Sync {
    /// Create the default settings document. Idempotent: existing settings
    /// are left untouched.
    async fn create_default_settings(&self, tenant_id: &str) -> Result<()>;

    /// Returns `false` when the tenant has no settings.
    async fn update_tenant_logo(&self, tenant_id: &str, logo_url: &str) -> Result<bool>;
}

pub struct MongoSettingsService {
    collection: Collection<TenantSettings>,
}

impl MongoSettingsService {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(TENANT_SETTINGS),
        }
    }

    pub async fn find_by_tenant(&self, tenant_id: &str) -> Result<Option<TenantSettings>> {
        Ok(self.collection.find_one(doc! { "tenantId": tenant_id }).await?)
    }
}

#[async_trait]
impl SettingsService for MongoSettingsService {
    async fn create_default_settings(&self, tenant_id: &str) -> Result<()> {
        match self
            .collection
            .insert_one(TenantSettings::defaults_for(tenant_id))
            .await
        {
            Ok(_) => {
                debug!(tenant_id, "Created default tenant settings");
                Ok(())
            }
            Err(e) if is_duplicate_key_error(&e) => Ok(()),
            Err(e) => Err(IdentityError::upstream("settings", e.to_string())),
        }
    }

    async fn update_tenant_logo(&self, tenant_id: &str, logo_url: &str) -> Result<bool> {
        let result = self
            .collection
            .update_one(
                doc! { "tenantId": tenant_id },
                doc! { "$set": {
                    "logoUrl": logo_url,
                    "updatedAt": bson::DateTime::from_chrono(crate::shared::now()),
                } },
            )
            .await
            .map_err(|e| IdentityError::upstream("settings", e.to_string()))?;
        Ok(result.matched_count > 0)
    }
}

#[derive(Clone, Default)]
pub struct MemorySettingsService {
    settings: Arc<RwLock<HashMap<String, TenantSettings>>>,
}

impl MemorySettingsService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tenant_id: &str) -> Option<TenantSettings> {
        self.settings.read().get(tenant_id).cloned()
    }
}

#[async_trait]
impl SettingsService for MemorySettingsService {
    async fn create_default_settings(&self, tenant_id: &str) -> Result<()> {
        self.settings
            .write()
            .entry(tenant_id.to_string())
            .or_insert_with(|| TenantSettings::defaults_for(tenant_id));
        Ok(())
    }

    async fn update_tenant_logo(&self, tenant_id: &str, logo_url: &str) -> Result<bool> {
        let mut settings = self.settings.write();
        match settings.get_mut(tenant_id) {
            Some(s) => {
                s.logo_url = Some(logo_url.to_string());
                s.updated_at = crate::shared::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_defaults_is_idempotent() {
        let service = MemorySettingsService::new();
        service.create_default_settings("T1").await.unwrap();
        service.update_tenant_logo("T1", "https://cdn.test/logo.png").await.unwrap();
        service.create_default_settings("T1").await.unwrap();

        let settings = service.get("T1").unwrap();
        assert_eq!(settings.logo_url.as_deref(), Some("https://cdn.test/logo.png"));
        assert_eq!(settings.locale, "en");
    }

    #[tokio::test]
    async fn test_logo_update_for_unknown_tenant() {
        let service = MemorySettingsService::new();
        assert!(!service.update_tenant_logo("nope", "x").await.unwrap());
    }
}

//! Tenant Entity
//!
//! A customer organisation. Name, domain and API key are globally unique.
//! Tenants are never hard-deleted; deactivation flips `is_active`.

use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    /// TSID as Crockford Base32 string
    #[serde(rename = "_id")]
    pub id: String,

    /// Display name, unique across tenants
    pub name: String,

    /// Lower-cased domain, unique across tenants
    pub domain: String,

    /// 64-char alphanumeric key identifying the tenant to API callers
    pub api_key: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,

    /// Billing plan, if one has been attached
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub plan_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subscription_id: Option<String>,

    #[serde(default = "default_active")]
    pub is_active: bool,

    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Tenant {
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let now = crate::shared::now();
        Self {
            id: crate::TsidGenerator::generate(),
            name: name.into(),
            domain: domain.into(),
            api_key: api_key.into(),
            description: None,
            plan_id: None,
            subscription_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_plan(mut self, plan_id: Option<String>) -> Self {
        self.plan_id = plan_id;
        self
    }
}

//! Billing collaborator
//!
//! Only the free-tier plan lookup participates in tenant provisioning.
//! The billing service keeps the current free-tier plan in the shared cache
//! under `plan:free_tier`; that entry is consulted first and never written
//! from here.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::cache::{keys, CacheLayer};
use crate::shared::error::{IdentityError, Result};

#[async_trait]
pub trait BillingClient: Send + Sync {
    /// Id of the current free-tier plan, `None` if billing has none.
    /// Any failure (including timeout) is `UpstreamUnavailable`.
    async fn free_tier_plan_id(&self) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    id: Option<String>,
}

/// HTTP client for the billing service (`GET {base}/plans/free-tier`).
pub struct HttpBillingClient {
    http_client: reqwest::Client,
    base_url: String,
    cache: Option<CacheLayer>,
}

impl HttpBillingClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IdentityError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: None,
        })
    }

    /// Consult the shared cache before calling the service.
    pub fn with_cache(mut self, cache: CacheLayer) -> Self {
        self.cache = Some(cache);
        self
    }

    async fn cached_plan_id(&self) -> Option<String> {
        let raw = self.cache.as_ref()?.get_raw(keys::FREE_TIER_PLAN).await?;
        parse_cached_plan(&raw)
    }
}

/// The cached entry is either a plan object (`{"id": "..."}`) or a bare id,
/// possibly JSON-quoted.
fn parse_cached_plan(raw: &str) -> Option<String> {
    let id = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        Ok(serde_json::Value::String(id)) => Some(id),
        Ok(_) => None,
        Err(_) => {
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
    };
    id.filter(|id| !id.is_empty())
}

#[async_trait]
impl BillingClient for HttpBillingClient {
    async fn free_tier_plan_id(&self) -> Result<Option<String>> {
        if let Some(plan_id) = self.cached_plan_id().await {
            debug!(plan_id = %plan_id, "Free-tier plan resolved from cache");
            return Ok(Some(plan_id));
        }

        let url = format!("{}/plans/free-tier", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| IdentityError::upstream("billing", e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(IdentityError::upstream(
                "billing",
                format!("GET {} returned {}", url, response.status()),
            ));
        }

        let plan: PlanResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::upstream("billing", format!("invalid plan body: {}", e)))?;

        debug!(plan_id = ?plan.id, "Free-tier plan resolved from billing");
        Ok(plan.id.filter(|id| !id.is_empty()))
    }
}

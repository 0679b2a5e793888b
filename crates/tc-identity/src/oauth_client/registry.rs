//! Client Registry
//!
//! Read-through cached access to OAuth client registrations. The cache holds
//! the durable record under `oauth_client:<id>` and the id under
//! `oauth_client:client_id:<clientId>`.

use std::sync::Arc;
use tracing::{debug, info};

use super::entity::RegisteredClientRecord;
use super::mapper::{to_durable, to_protocol};
use super::registered_client::RegisteredClient;
use super::repository::RegisteredClientRepository;
use crate::cache::{keys, CacheLayer};
use crate::shared::error::Result;

pub struct ClientRegistry {
    repository: Arc<dyn RegisteredClientRepository>,
    cache: CacheLayer,
}

impl ClientRegistry {
    pub fn new(repository: Arc<dyn RegisteredClientRepository>, cache: CacheLayer) -> Self {
        Self { repository, cache }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<RegisteredClient>> {
        if let Some(record) = self
            .cache
            .get_json::<RegisteredClientRecord>(&keys::oauth_client(id))
            .await
        {
            return to_protocol(&record).map(Some);
        }

        match self.repository.find_by_id(id).await? {
            Some(record) => {
                let client = to_protocol(&record)?;
                self.cache_record(&record).await;
                Ok(Some(client))
            }
            None => Ok(None),
        }
    }

    pub async fn find_by_client_id(&self, client_id: &str) -> Result<Option<RegisteredClient>> {
        if let Some(id) = self
            .cache
            .get_raw(&keys::oauth_client_by_client_id(client_id))
            .await
        {
            if let Some(record) = self
                .cache
                .get_json::<RegisteredClientRecord>(&keys::oauth_client(&id))
                .await
                .filter(|r| r.client_id == client_id)
            {
                return to_protocol(&record).map(Some);
            }
        }

        match self.repository.find_by_client_id(client_id).await? {
            Some(record) => {
                let client = to_protocol(&record)?;
                self.cache_record(&record).await;
                Ok(Some(client))
            }
            None => Ok(None),
        }
    }

    /// Upsert by client id. An existing registration keeps its id and
    /// creation time; every other field is overwritten.
    ///
    /// Cache keys are evicted before and again after the durable write, so a
    /// reader that re-caches the old record in between cannot outlive it.
    pub async fn save(&self, client: &RegisteredClient) -> Result<RegisteredClient> {
        let mut record = to_durable(client);

        match self.repository.find_by_client_id(client.client_id()).await? {
            Some(existing) => {
                record.id = existing.id.clone();
                record.created_at = existing.created_at;
                self.evict(&existing).await;
                self.evict(&record).await;
                self.repository.update(&record).await?;
                self.evict(&existing).await;
                self.evict(&record).await;
                info!(client_id = %record.client_id, id = %record.id, "Updated registered client");
            }
            None => {
                self.evict(&record).await;
                self.repository.insert(&record).await?;
                self.evict(&record).await;
                info!(client_id = %record.client_id, id = %record.id, "Registered new client");
            }
        }

        to_protocol(&record)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let existing = self.repository.find_by_id(id).await?;
        let deleted = self.repository.delete(id).await?;
        match existing {
            Some(record) => self.evict(&record).await,
            None => self.cache.delete(&[keys::oauth_client(id)]).await,
        }
        if deleted {
            info!(id, "Deleted registered client");
        }
        Ok(deleted)
    }

    async fn cache_record(&self, record: &RegisteredClientRecord) {
        let ttl = self.cache.ttls().default;
        self.cache
            .set_json(&keys::oauth_client(&record.id), record, ttl)
            .await;
        self.cache
            .set_raw(&keys::oauth_client_by_client_id(&record.client_id), &record.id, ttl)
            .await;
        debug!(client_id = %record.client_id, "Cached registered client");
    }

    async fn evict(&self, record: &RegisteredClientRecord) {
        self.cache
            .delete(&[
                keys::oauth_client(&record.id),
                keys::oauth_client_by_client_id(&record.client_id),
            ])
            .await;
    }
}

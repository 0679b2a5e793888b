//! Registered Client Repository

use async_trait::async_trait;
use mongodb::{bson::doc, Collection, Database};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::entity::RegisteredClientRecord;
use crate::shared::error::{IdentityError, Result};
use crate::shared::indexes::OAUTH_REGISTERED_CLIENTS;

#[async_trait]
pub trait RegisteredClientRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<RegisteredClientRecord>>;

    async fn find_by_client_id(&self, client_id: &str) -> Result<Option<RegisteredClientRecord>>;

    /// Fails with `Conflict` if the client id is already registered.
    async fn insert(&self, record: &RegisteredClientRecord) -> Result<()>;

    async fn update(&self, record: &RegisteredClientRecord) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<bool>;
}

pub struct MongoRegisteredClientRepository {
    collection: Collection<RegisteredClientRecord>,
}

impl MongoRegisteredClientRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(OAUTH_REGISTERED_CLIENTS),
        }
    }
}

#[async_trait]
impl RegisteredClientRepository for MongoRegisteredClientRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<RegisteredClientRecord>> {
        Ok(self.collection.find_one(doc! { "_id": id }).await?)
    }

    async fn find_by_client_id(&self, client_id: &str) -> Result<Option<RegisteredClientRecord>> {
        Ok(self.collection.find_one(doc! { "clientId": client_id }).await?)
    }

    async fn insert(&self, record: &RegisteredClientRecord) -> Result<()> {
        self.collection.insert_one(record).await.map_err(|e| {
            if crate::shared::error::is_duplicate_key_error(&e) {
                IdentityError::conflict("RegisteredClient", "clientId", &record.client_id)
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn update(&self, record: &RegisteredClientRecord) -> Result<()> {
        self.collection
            .replace_one(doc! { "_id": &record.id }, record)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = self.collection.delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count > 0)
    }
}

/// In-process repository enforcing the same client id uniqueness.
#[derive(Clone, Default)]
pub struct MemoryRegisteredClientRepository {
    records: Arc<RwLock<HashMap<String, RegisteredClientRecord>>>,
}

impl MemoryRegisteredClientRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Store a record as-is, bypassing conversion. Lets tests plant
    /// corrupt documents.
    pub fn put_raw(&self, record: RegisteredClientRecord) {
        self.records.write().insert(record.id.clone(), record);
    }
}

#[async_trait]
impl RegisteredClientRepository for MemoryRegisteredClientRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<RegisteredClientRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn find_by_client_id(&self, client_id: &str) -> Result<Option<RegisteredClientRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .find(|r| r.client_id == client_id)
            .cloned())
    }

    async fn insert(&self, record: &RegisteredClientRecord) -> Result<()> {
        let mut records = self.records.write();
        if records.values().any(|r| r.client_id == record.client_id) {
            return Err(IdentityError::conflict(
                "RegisteredClient",
                "clientId",
                &record.client_id,
            ));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &RegisteredClientRecord) -> Result<()> {
        self.records.write().insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.write().remove(id).is_some())
    }
}

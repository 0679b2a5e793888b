//! User Repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{bson::doc, Collection, Database};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::entity::User;
use crate::shared::error::{is_duplicate_key_error, IdentityError, Result};
use crate::shared::indexes::USERS;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_by_tenant(&self, tenant_id: &str) -> Result<Vec<User>>;

    /// Fails with `Conflict` on a duplicate username or email.
    async fn insert(&self, user: &User) -> Result<()>;

    async fn update(&self, user: &User) -> Result<()>;

    /// Touch `lastLoginAt` and `updatedAt` without rewriting the document.
    async fn update_last_login(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
}

pub struct MongoUserRepository {
    collection: Collection<User>,
}

impl MongoUserRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(USERS),
        }
    }
}

#[async_trait]
impl UserRepository for MongoUserRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self.collection.find_one(doc! { "_id": id }).await?)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.collection.find_one(doc! { "username": username }).await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.collection.find_one(doc! { "email": email }).await?)
    }

    async fn find_by_tenant(&self, tenant_id: &str) -> Result<Vec<User>> {
        let cursor = self
            .collection
            .find(doc! { "tenantId": tenant_id })
            .sort(doc! { "createdAt": 1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert(&self, user: &User) -> Result<()> {
        self.collection.insert_one(user).await.map_err(|e| {
            if is_duplicate_key_error(&e) {
                if e.to_string().contains("email") {
                    IdentityError::conflict("User", "email", &user.email)
                } else {
                    IdentityError::conflict("User", "username", &user.username)
                }
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<()> {
        self.collection
            .replace_one(doc! { "_id": &user.id }, user)
            .await?;
        Ok(())
    }

    async fn update_last_login(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let at = bson::DateTime::from_chrono(at);
        self.collection
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { "lastLoginAt": at, "updatedAt": at } },
            )
            .await?;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryUserRepository {
    users: Arc<RwLock<HashMap<String, User>>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        Ok(self.users.read().get(id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.users.read().values().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.users.read().values().find(|u| u.email == email).cloned())
    }

    async fn find_by_tenant(&self, tenant_id: &str) -> Result<Vec<User>> {
        let mut users: Vec<User> = self
            .users
            .read()
            .values()
            .filter(|u| u.tenant_id == tenant_id)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn insert(&self, user: &User) -> Result<()> {
        let mut users = self.users.write();
        for existing in users.values() {
            if existing.username == user.username {
                return Err(IdentityError::conflict("User", "username", &user.username));
            }
            if existing.email == user.email {
                return Err(IdentityError::conflict("User", "email", &user.email));
            }
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<()> {
        self.users.write().insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn update_last_login(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(user) = self.users.write().get_mut(id) {
            user.last_login_at = Some(at);
            user.updated_at = at;
        }
        Ok(())
    }
}

//! MongoDB Index Initialization
//!
//! Creates indexes for all collections on application startup. The unique
//! indexes are what guarantee global uniqueness of tenant names, domains,
//! API keys, usernames, emails, client ids and token values.

use mongodb::{bson::doc, options::IndexOptions, Database, IndexModel};
use tracing::info;

pub const TENANTS: &str = "tenants";
pub const USERS: &str = "users";
pub const OAUTH_REGISTERED_CLIENTS: &str = "oauth_registered_clients";
pub const VERIFICATION_TOKENS: &str = "verification_tokens";
/// One document per token subject, bumped inside every issuance transaction
pub const VERIFICATION_TOKEN_GUARDS: &str = "verification_token_guards";
pub const TENANT_SETTINGS: &str = "tenant_settings";

/// Initialize all MongoDB indexes
pub async fn initialize_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    info!("Initializing MongoDB indexes...");

    create_tenant_indexes(db).await?;
    create_user_indexes(db).await?;
    create_client_indexes(db).await?;
    create_verification_token_indexes(db).await?;
    create_settings_indexes(db).await?;

    info!("MongoDB indexes initialized successfully");
    Ok(())
}

fn unique_index(keys: mongodb::bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

fn plain_index(keys: mongodb::bson::Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

async fn create_tenant_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let tenants = db.collection::<mongodb::bson::Document>(TENANTS);

    tenants.create_index(unique_index(doc! { "name": 1 })).await?;
    tenants.create_index(unique_index(doc! { "domain": 1 })).await?;
    tenants.create_index(unique_index(doc! { "apiKey": 1 })).await?;

    info!("Created indexes on tenants");
    Ok(())
}

async fn create_user_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let users = db.collection::<mongodb::bson::Document>(USERS);

    users.create_index(unique_index(doc! { "username": 1 })).await?;
    users.create_index(unique_index(doc! { "email": 1 })).await?;
    users.create_index(plain_index(doc! { "tenantId": 1 })).await?;

    info!("Created indexes on users");
    Ok(())
}

async fn create_client_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let clients = db.collection::<mongodb::bson::Document>(OAUTH_REGISTERED_CLIENTS);

    clients.create_index(unique_index(doc! { "clientId": 1 })).await?;

    info!("Created indexes on oauth_registered_clients");
    Ok(())
}

async fn create_verification_token_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let tokens = db.collection::<mongodb::bson::Document>(VERIFICATION_TOKENS);

    tokens.create_index(unique_index(doc! { "token": 1 })).await?;

    // Rate-limit window counts and supersede sweeps
    tokens
        .create_index(plain_index(doc! { "userId": 1, "tokenType": 1, "createdAt": -1 }))
        .await?;
    tokens
        .create_index(plain_index(doc! { "email": 1, "tokenType": 1, "createdAt": -1 }))
        .await?;

    // Housekeeping
    tokens.create_index(plain_index(doc! { "expiresAt": 1 })).await?;

    info!("Created indexes on verification_tokens");
    Ok(())
}

async fn create_settings_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let settings = db.collection::<mongodb::bson::Document>(TENANT_SETTINGS);

    settings.create_index(unique_index(doc! { "tenantId": 1 })).await?;

    info!("Created indexes on tenant_settings");
    Ok(())
}

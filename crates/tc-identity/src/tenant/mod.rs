//! Tenants and tenant provisioning

pub mod api_key;
pub mod entity;
pub mod repository;
pub mod service;

pub use entity::Tenant;
pub use repository::{MemoryTenantRepository, MongoTenantRepository, TenantRepository};
pub use service::TenantProvisioningService;

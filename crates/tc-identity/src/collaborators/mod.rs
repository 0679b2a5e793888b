//! External collaborators, specified at their interface boundary

pub mod billing;
pub mod settings;

pub use billing::{BillingClient, HttpBillingClient};
pub use settings::{MemorySettingsService, MongoSettingsService, SettingsService, TenantSettings};

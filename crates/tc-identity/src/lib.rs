//! TenantCore Identity
//!
//! Identity and credential-issuance core of a multi-tenant platform:
//! - OAuth2 client registrations (durable record <-> protocol object)
//! - Tenant provisioning with globally unique API keys
//! - User principal resolution and user lifecycle
//! - Single-use, rate-limited verification tokens
//! - Cache-aside layer over tenants and users
//! - Inbound billing events applied to tenant state
//!
//! ## Module Organization (Aggregate-based)
//!
//! Each aggregate contains:
//! - `entity` - Domain entities
//! - `repository` - Data access (MongoDB and in-memory)
//! - `service` - Operations

// Aggregates
pub mod oauth_client;
pub mod tenant;
pub mod user;
pub mod verification;

// Cross-cutting
pub mod cache;
pub mod collaborators;
pub mod events;

// Shared infrastructure
pub mod shared;

pub use shared::error::{IdentityError, Result};
pub use shared::indexes::initialize_indexes;
pub use shared::tsid::TsidGenerator;

// Main entity types
pub use oauth_client::{RegisteredClient, RegisteredClientRecord};
pub use tenant::Tenant;
pub use user::{Role, User, UserPrincipal};
pub use verification::{TokenType, VerificationToken};

// Services
pub use cache::CacheLayer;
pub use events::{EventBridge, ProvisioningEvents};
pub use oauth_client::ClientRegistry;
pub use tenant::TenantProvisioningService;
pub use user::UserIdentityService;
pub use verification::VerificationTokenService;

//! OAuth client registrations

pub mod entity;
pub mod mapper;
pub mod registered_client;
pub mod registry;
pub mod repository;

pub use entity::RegisteredClientRecord;
pub use mapper::{to_durable, to_protocol};
pub use registered_client::{
    AuthorizationGrantType, ClientAuthenticationMethod, ClientSettings, RegisteredClient,
    RegisteredClientBuilder, TokenSettings,
};
pub use registry::ClientRegistry;
pub use repository::{
    MemoryRegisteredClientRepository, MongoRegisteredClientRepository,
    RegisteredClientRepository,
};

//! Users, principals and password handling

pub mod entity;
pub mod password_service;
pub mod principal;
pub mod repository;
pub mod service;

pub use entity::{Role, User};
pub use password_service::{Argon2Config, PasswordPolicy, PasswordService};
pub use principal::UserPrincipal;
pub use repository::{MemoryUserRepository, MongoUserRepository, UserRepository};
pub use service::{NewUser, UserIdentityService};

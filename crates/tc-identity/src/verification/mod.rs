//! Single-use verification tokens

pub mod entity;
pub mod repository;
pub mod service;

pub use entity::{TokenType, VerificationToken};
pub use repository::{
    IssueOutcome, MemoryVerificationTokenRepository, MongoVerificationTokenRepository,
    VerificationTokenRepository,
};
pub use service::{IssuedToken, TokenPolicy, ValidatedToken, VerificationTokenService};

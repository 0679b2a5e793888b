//! Identity Error Types

use thiserror::Error;

use tc_queue::QueueError;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Conflict: {entity_type} with {field}={value} already exists")]
    Conflict { entity_type: String, field: String, value: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String, retry_after_secs: u64 },

    #[error("Verification token not found")]
    TokenNotFound,

    #[error("Verification token has already been used")]
    TokenAlreadyUsed,

    #[error("Verification token has expired")]
    TokenExpired,

    #[error("Upstream service {service} unavailable: {message}")]
    UpstreamUnavailable { service: String, message: String },

    #[error("Failed to decode registered client {client_id}: {message}")]
    ClientDecode { client_id: String, message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bson::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] bson::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl IdentityError {
    pub fn conflict(
        entity_type: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            entity_type: entity_type.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after_secs,
        }
    }

    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn client_decode(client_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ClientDecode {
            client_id: client_id.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::Conflict { .. } => "CONFLICT",
            IdentityError::NotFound { .. } => "NOT_FOUND",
            IdentityError::RateLimited { .. } => "RATE_LIMITED",
            IdentityError::TokenNotFound => "TOKEN_NOT_FOUND",
            IdentityError::TokenAlreadyUsed => "TOKEN_ALREADY_USED",
            IdentityError::TokenExpired => "TOKEN_EXPIRED",
            IdentityError::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            IdentityError::ClientDecode { .. } => "CLIENT_DECODE_ERROR",
            IdentityError::Validation { .. } => "VALIDATION_ERROR",
            IdentityError::Database(_) => "DATABASE_ERROR",
            IdentityError::Serialization(_) | IdentityError::Deserialization(_) => {
                "SERIALIZATION_ERROR"
            }
            IdentityError::Json(_) => "JSON_ERROR",
            IdentityError::Cache(_) => "CACHE_ERROR",
            IdentityError::Queue(_) => "QUEUE_ERROR",
            IdentityError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// True for a storage unique-index violation (MongoDB code 11000).
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            IdentityError::Database(e) => is_duplicate_key_error(e),
            _ => false,
        }
    }
}

impl From<redis::RedisError> for IdentityError {
    fn from(e: redis::RedisError) -> Self {
        IdentityError::Cache(e.to_string())
    }
}

/// Check if a MongoDB error is a duplicate key error (code 11000)
pub fn is_duplicate_key_error(error: &mongodb::error::Error) -> bool {
    if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(write_error)) =
        error.kind.as_ref()
    {
        return write_error.code == 11000;
    }
    false
}

pub type Result<T> = std::result::Result<T, IdentityError>;

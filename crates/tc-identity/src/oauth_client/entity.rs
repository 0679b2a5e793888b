//! Registered Client (durable record)
//!
//! Storage shape of an OAuth 2.0 client registration. Set-valued fields are
//! JSON-encoded string arrays and token lifetimes are ISO-8601 durations, so
//! the document stays readable by other services sharing the collection.

use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredClientRecord {
    #[serde(rename = "_id")]
    pub id: String,

    /// OAuth client_id (public identifier), unique
    pub client_id: String,

    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub client_id_issued_at: DateTime<Utc>,

    /// Encoded secret (e.g. `{argon2}...`); absent for public clients
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_secret: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default, with = "bson::serde_helpers::chrono_datetime_as_bson_datetime_optional")]
    pub client_secret_expires_at: Option<DateTime<Utc>>,

    pub client_name: String,

    /// JSON array, e.g. `["client_secret_basic"]`
    pub authentication_methods: String,

    /// JSON array, e.g. `["authorization_code","refresh_token"]`
    pub grant_types: String,

    /// JSON array of URIs
    pub redirect_uris: String,

    /// JSON array of URIs
    pub post_logout_redirect_uris: String,

    /// JSON array of scope names
    pub scopes: String,

    #[serde(default)]
    pub require_consent: bool,

    #[serde(default)]
    pub require_pkce: bool,

    /// ISO-8601 duration, e.g. `PT5M`
    pub access_token_ttl: String,

    /// ISO-8601 duration, e.g. `PT1H`
    pub refresh_token_ttl: String,

    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

//! Registered Client (protocol representation)
//!
//! Immutable view of a client registration used by the authorization
//! server. Built with [`RegisteredClient::builder`].

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::shared::error::{IdentityError, Result};

/// How a client authenticates at the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClientAuthenticationMethod {
    ClientSecretBasic,
    ClientSecretPost,
    ClientSecretJwt,
    PrivateKeyJwt,
    None,
}

impl ClientAuthenticationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
            Self::ClientSecretJwt => "client_secret_jwt",
            Self::PrivateKeyJwt => "private_key_jwt",
            Self::None => "none",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "client_secret_basic" => Some(Self::ClientSecretBasic),
            "client_secret_post" => Some(Self::ClientSecretPost),
            "client_secret_jwt" => Some(Self::ClientSecretJwt),
            "private_key_jwt" => Some(Self::PrivateKeyJwt),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// OAuth grant type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuthorizationGrantType {
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
    DeviceCode,
    JwtBearer,
}

impl AuthorizationGrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
            Self::ClientCredentials => "client_credentials",
            Self::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
            Self::JwtBearer => "urn:ietf:params:oauth:grant-type:jwt-bearer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            "refresh_token" => Some(Self::RefreshToken),
            "client_credentials" => Some(Self::ClientCredentials),
            "urn:ietf:params:oauth:grant-type:device_code" => Some(Self::DeviceCode),
            "urn:ietf:params:oauth:grant-type:jwt-bearer" => Some(Self::JwtBearer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub require_authorization_consent: bool,
    pub require_proof_key: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            require_authorization_consent: false,
            require_proof_key: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSettings {
    pub access_token_time_to_live: Duration,
    pub refresh_token_time_to_live: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            access_token_time_to_live: Duration::from_secs(5 * 60),
            refresh_token_time_to_live: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredClient {
    id: String,
    client_id: String,
    client_id_issued_at: DateTime<Utc>,
    client_secret: Option<String>,
    client_secret_expires_at: Option<DateTime<Utc>>,
    client_name: String,
    authentication_methods: BTreeSet<ClientAuthenticationMethod>,
    grant_types: BTreeSet<AuthorizationGrantType>,
    redirect_uris: BTreeSet<String>,
    post_logout_redirect_uris: BTreeSet<String>,
    scopes: BTreeSet<String>,
    client_settings: ClientSettings,
    token_settings: TokenSettings,
}

impl RegisteredClient {
    pub fn builder(id: impl Into<String>) -> RegisteredClientBuilder {
        RegisteredClientBuilder::new(id)
    }

    /// Builder seeded with every field of this client, for derived copies.
    pub fn to_builder(&self) -> RegisteredClientBuilder {
        RegisteredClientBuilder { client: self.clone() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_id_issued_at(&self) -> DateTime<Utc> {
        self.client_id_issued_at
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    pub fn client_secret_expires_at(&self) -> Option<DateTime<Utc>> {
        self.client_secret_expires_at
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn authentication_methods(&self) -> &BTreeSet<ClientAuthenticationMethod> {
        &self.authentication_methods
    }

    pub fn grant_types(&self) -> &BTreeSet<AuthorizationGrantType> {
        &self.grant_types
    }

    pub fn redirect_uris(&self) -> &BTreeSet<String> {
        &self.redirect_uris
    }

    pub fn post_logout_redirect_uris(&self) -> &BTreeSet<String> {
        &self.post_logout_redirect_uris
    }

    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    pub fn client_settings(&self) -> &ClientSettings {
        &self.client_settings
    }

    pub fn token_settings(&self) -> &TokenSettings {
        &self.token_settings
    }

    pub fn supports_grant(&self, grant: AuthorizationGrantType) -> bool {
        self.grant_types.contains(&grant)
    }

    /// Exact-match check, as OAuth 2.1 requires for redirect URIs.
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.contains(uri)
    }

    pub fn is_public(&self) -> bool {
        self.authentication_methods
            .iter()
            .all(|m| *m == ClientAuthenticationMethod::None)
    }
}

pub struct RegisteredClientBuilder {
    client: RegisteredClient,
}

impl RegisteredClientBuilder {
    fn new(id: impl Into<String>) -> Self {
        Self {
            client: RegisteredClient {
                id: id.into(),
                client_id: String::new(),
                client_id_issued_at: crate::shared::now(),
                client_secret: None,
                client_secret_expires_at: None,
                client_name: String::new(),
                authentication_methods: BTreeSet::new(),
                grant_types: BTreeSet::new(),
                redirect_uris: BTreeSet::new(),
                post_logout_redirect_uris: BTreeSet::new(),
                scopes: BTreeSet::new(),
                client_settings: ClientSettings::default(),
                token_settings: TokenSettings::default(),
            },
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.client.id = id.into();
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client.client_id = client_id.into();
        self
    }

    pub fn client_id_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.client.client_id_issued_at = issued_at;
        self
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client.client_secret = Some(secret.into());
        self
    }

    pub fn client_secret_expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.client.client_secret_expires_at = expires_at;
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client.client_name = name.into();
        self
    }

    pub fn authentication_method(mut self, method: ClientAuthenticationMethod) -> Self {
        self.client.authentication_methods.insert(method);
        self
    }

    pub fn grant_type(mut self, grant: AuthorizationGrantType) -> Self {
        self.client.grant_types.insert(grant);
        self
    }

    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.client.redirect_uris.insert(uri.into());
        self
    }

    pub fn post_logout_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.client.post_logout_redirect_uris.insert(uri.into());
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.client.scopes.insert(scope.into());
        self
    }

    pub fn client_settings(mut self, settings: ClientSettings) -> Self {
        self.client.client_settings = settings;
        self
    }

    pub fn token_settings(mut self, settings: TokenSettings) -> Self {
        self.client.token_settings = settings;
        self
    }

    /// Requires a client id, a name, at least one grant type and at least
    /// one authentication method. A client using the authorization-code
    /// grant needs at least one redirect URI.
    pub fn build(self) -> Result<RegisteredClient> {
        let c = self.client;
        if c.client_id.trim().is_empty() {
            return Err(IdentityError::validation("client_id cannot be empty"));
        }
        if c.client_name.trim().is_empty() {
            return Err(IdentityError::validation("client_name cannot be empty"));
        }
        if c.grant_types.is_empty() {
            return Err(IdentityError::validation("at least one grant type is required"));
        }
        if c.authentication_methods.is_empty() {
            return Err(IdentityError::validation(
                "at least one client authentication method is required",
            ));
        }
        if c.grant_types.contains(&AuthorizationGrantType::AuthorizationCode)
            && c.redirect_uris.is_empty()
        {
            return Err(IdentityError::validation(
                "authorization_code clients need at least one redirect URI",
            ));
        }
        Ok(c)
    }

    /// Skip validation. Used when rehydrating stored registrations, which
    /// must load even if they predate the current rules.
    pub(crate) fn build_unchecked(self) -> RegisteredClient {
        self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web_client() -> RegisteredClient {
        RegisteredClient::builder("C1")
            .client_id("web-app")
            .client_name("Web App")
            .client_secret("{noop}secret")
            .authentication_method(ClientAuthenticationMethod::ClientSecretBasic)
            .grant_type(AuthorizationGrantType::AuthorizationCode)
            .grant_type(AuthorizationGrantType::RefreshToken)
            .redirect_uri("https://app.acme.test/callback")
            .scope("openid")
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_and_helpers() {
        let client = web_client();
        assert!(client.supports_grant(AuthorizationGrantType::RefreshToken));
        assert!(!client.supports_grant(AuthorizationGrantType::ClientCredentials));
        assert!(client.is_redirect_uri_allowed("https://app.acme.test/callback"));
        assert!(!client.is_redirect_uri_allowed("https://app.acme.test/callback/"));
        assert!(!client.is_public());
    }

    #[test]
    fn test_builder_rejects_missing_redirect_for_code_grant() {
        let result = RegisteredClient::builder("C1")
            .client_id("web-app")
            .client_name("Web App")
            .authentication_method(ClientAuthenticationMethod::None)
            .grant_type(AuthorizationGrantType::AuthorizationCode)
            .build();
        assert!(matches!(result, Err(IdentityError::Validation { .. })));
    }

    #[test]
    fn test_to_builder_derives_copy() {
        let client = web_client();
        let copy = client.to_builder().client_name("Renamed").build().unwrap();
        assert_eq!(copy.id(), client.id());
        assert_eq!(copy.client_name(), "Renamed");
    }

    #[test]
    fn test_enum_strings_parse_back() {
        for m in [
            ClientAuthenticationMethod::ClientSecretBasic,
            ClientAuthenticationMethod::PrivateKeyJwt,
            ClientAuthenticationMethod::None,
        ] {
            assert_eq!(ClientAuthenticationMethod::parse(m.as_str()), Some(m));
        }
        assert_eq!(
            AuthorizationGrantType::parse("urn:ietf:params:oauth:grant-type:device_code"),
            Some(AuthorizationGrantType::DeviceCode)
        );
        assert_eq!(AuthorizationGrantType::parse("implicit"), None);
    }
}

//! User identity and OAuth client registry tests

use std::sync::Arc;
use std::time::Duration;

use tc_identity::cache::{CacheTtls, MemoryCacheStore};
use tc_identity::oauth_client::{
    to_durable, to_protocol, AuthorizationGrantType, ClientAuthenticationMethod, ClientRegistry,
    MemoryRegisteredClientRepository, RegisteredClient, RegisteredClientRepository, TokenSettings,
};
use tc_identity::user::{
    Argon2Config, MemoryUserRepository, NewUser, PasswordPolicy, PasswordService, Role,
    User, UserIdentityService, UserRepository,
};
use tc_identity::{CacheLayer, IdentityError};

fn identity() -> (UserIdentityService, MemoryUserRepository, MemoryCacheStore) {
    let repo = MemoryUserRepository::new();
    let store = MemoryCacheStore::new();
    let cache = CacheLayer::new(Arc::new(store.clone()), CacheTtls::default());
    let passwords =
        PasswordService::new(Argon2Config::testing(), PasswordPolicy::default()).unwrap();
    let service = UserIdentityService::new(Arc::new(repo.clone()), cache, Arc::new(passwords));
    (service, repo, store)
}

#[tokio::test]
async fn test_usernames_are_unique_across_tenants() {
    let (service, _, _) = identity();
    service
        .register_user(NewUser::new("T1", "alice", "alice@one.test", "secret123"))
        .await
        .unwrap();
    let err = service
        .register_user(NewUser::new("T2", "alice", "alice@two.test", "secret123"))
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::Conflict { ref field, .. } if field == "username"));
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let (service, _, _) = identity();
    let err = service.resolve_principal("ghost").await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn test_principal_authorities_follow_active_roles() {
    let (service, repo, _) = identity();
    let mut user = User::new("T1", "alice", "alice@acme.test", "hash")
        .with_role(Role::new("admin"))
        .with_role(Role::new("billing").inactive())
        .with_role(Role::new("ADMIN"));
    user.verify_email();
    repo.insert(&user).await.unwrap();

    let principal = service.resolve_principal("alice").await.unwrap();
    assert_eq!(principal.authorities(), ["ROLE_ADMIN".to_string()]);
    assert_eq!(principal.user_id(), user.id);
}

#[tokio::test]
async fn test_inactive_user_is_not_found_even_when_cached() {
    let (service, repo, _) = identity();
    let user = User::new("T1", "bob", "bob@acme.test", "hash");
    repo.insert(&user).await.unwrap();

    assert!(service.get_user(&user.id).await.is_ok());
    let err = service.resolve_principal_by_email("bob@acme.test").await.unwrap_err();
    assert!(matches!(err, IdentityError::NotFound { .. }));
}

#[tokio::test]
async fn test_resolution_records_last_login_without_touching_cache() {
    let (service, repo, store) = identity();
    let user = service
        .register_user(NewUser::new("T1", "alice", "alice@acme.test", "secret123"))
        .await
        .unwrap();
    service.mark_email_verified(&user.id).await.unwrap();

    service.resolve_principal("alice").await.unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let stored = repo.find_by_id(&user.id).await.unwrap().unwrap();
            if stored.last_login_at.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(store.contains_key(&format!("user:{}", user.id)));
    let cached = service.get_user(&user.id).await.unwrap();
    assert!(cached.last_login_at.is_none());
}

fn web_client(id: &str) -> RegisteredClient {
    RegisteredClient::builder(id)
        .client_id("portal")
        .client_name("Customer Portal")
        .client_secret("$argon2id$stub")
        .authentication_method(ClientAuthenticationMethod::ClientSecretBasic)
        .authentication_method(ClientAuthenticationMethod::ClientSecretPost)
        .grant_type(AuthorizationGrantType::AuthorizationCode)
        .grant_type(AuthorizationGrantType::RefreshToken)
        .redirect_uri("https://portal.acme.test/callback")
        .post_logout_redirect_uri("https://portal.acme.test/")
        .scope("openid")
        .scope("profile")
        .token_settings(TokenSettings {
            access_token_time_to_live: Duration::from_secs(10 * 60),
            refresh_token_time_to_live: Duration::from_secs(12 * 3600),
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_save_existing_client_id_preserves_identity() {
    let repo = MemoryRegisteredClientRepository::new();
    let registry = ClientRegistry::new(Arc::new(repo.clone()), CacheLayer::in_memory());

    let first = registry.save(&web_client("C1")).await.unwrap();
    let created_at = repo.find_by_id("C1").await.unwrap().unwrap().created_at;

    let renamed = web_client("C2")
        .to_builder()
        .client_name("Portal v2")
        .build()
        .unwrap();
    let saved = registry.save(&renamed).await.unwrap();

    assert_eq!(saved.id(), first.id());
    assert_eq!(saved.client_name(), "Portal v2");
    assert_eq!(repo.find_by_id("C1").await.unwrap().unwrap().created_at, created_at);
    assert!(repo.find_by_id("C2").await.unwrap().is_none());

    let found = registry.find_by_client_id("portal").await.unwrap().unwrap();
    assert_eq!(found.client_name(), "Portal v2");
}

#[tokio::test]
async fn test_durable_round_trip_reproduces_client() {
    let client = web_client("C1");
    let decoded = to_protocol(&to_durable(&client)).unwrap();
    assert_eq!(decoded, client);
    assert!(decoded.supports_grant(AuthorizationGrantType::RefreshToken));
    assert!(decoded.is_redirect_uri_allowed("https://portal.acme.test/callback"));
    assert!(!decoded.is_redirect_uri_allowed("https://evil.test/callback"));
}

#[tokio::test]
async fn test_corrupt_client_record_is_decode_error() {
    let repo = MemoryRegisteredClientRepository::new();
    let mut record = to_durable(&web_client("C1"));
    record.scopes = "{not json".to_string();
    repo.put_raw(record);

    let registry = ClientRegistry::new(Arc::new(repo), CacheLayer::in_memory());
    let err = registry.find_by_id("C1").await.unwrap_err();
    assert!(matches!(err, IdentityError::ClientDecode { .. }));
}

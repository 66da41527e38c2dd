mod common;

use chrono::Duration;
use common::*;
use starberry_idp::{
    ClaimsProvider, Client, ClientError, ClientRegistry, GrantError, GrantStore, GrantType,
    InMemoryClaimsProvider, InMemoryClientRegistry, InMemoryGrantStore, UserProfile,
};

#[tokio::test]
async fn test_in_memory_client_registry() {
    let client = Client::new("client1")
        .with_secret("secret")
        .with_grant_types([GrantType::AuthorizationCode])
        .with_redirect_uri("https://app.local/callback")
        .with_scopes(["openid"]);
    let registry = InMemoryClientRegistry::new(vec![client.clone()]);

    let fetched = registry.lookup("client1").await.unwrap();
    assert_eq!(fetched, client);
    assert_eq!(registry.lookup("missing").await.unwrap_err(), ClientError::UnknownClient);

    assert!(registry.validate_secret("client1", "secret").await);
    assert!(!registry.validate_secret("client1", "Secret").await);
    assert!(!registry.validate_secret("missing", "secret").await);

    // Exact match only
    assert!(registry.is_redirect_allowed("client1", "https://app.local/callback").await);
    assert!(!registry.is_redirect_allowed("client1", "https://app.local/callback/").await);
    assert!(!registry.is_redirect_allowed("client1", "https://app.local/callback?x=1").await);
    assert!(!registry.is_redirect_allowed("client1", "https://app.local").await);
}

#[tokio::test]
async fn test_public_client_never_matches_a_secret() {
    let registry = InMemoryClientRegistry::new(vec![Client::new("spa")]);
    assert!(!registry.validate_secret("spa", "").await);
    assert!(!registry.validate_secret("spa", "anything").await);
}

#[tokio::test]
async fn test_grant_store_codes() {
    let clock = clock();
    let store = InMemoryGrantStore::new(clock.clone());
    let grant = profile_grant(&clock);

    let code = store.issue_code(grant.clone()).await.unwrap();
    // 256 bits, base64url
    assert_eq!(code.len(), 43);
    let other = store.issue_code(grant).await.unwrap();
    assert_ne!(code, other);

    let consumed = store.consume_code(&code).await.unwrap();
    assert_eq!(consumed.code, code);
    assert_eq!(consumed.subject, "alice");
    assert!(consumed.consumed);
    assert_eq!(store.consume_code(&code).await.unwrap_err(), GrantError::AlreadyConsumed);
    assert_eq!(store.consume_code("nope").await.unwrap_err(), GrantError::NotFound);

    clock.advance(Duration::minutes(5));
    assert_eq!(store.consume_code(&other).await.unwrap_err(), GrantError::Expired);

    // Eviction only reclaims memory
    assert_eq!(store.code_count(), 2);
    assert_eq!(store.evict_expired().await, 2);
    assert_eq!(store.consume_code(&other).await.unwrap_err(), GrantError::NotFound);
}

#[tokio::test]
async fn test_grant_store_refresh_chain() {
    let clock = clock();
    let store = InMemoryGrantStore::new(clock.clone());
    let original = store
        .issue_refresh_token(api_chain(&clock, Duration::days(30)))
        .await
        .unwrap();

    let next = store.rotate_refresh_token(&original.token, "app1", None).await.unwrap();
    assert_eq!(next.chain_id, original.chain_id);
    assert_eq!(next.parent.as_deref(), Some(original.token.as_str()));
    assert_eq!(next.expires_at, original.expires_at);

    let found = store.find_refresh_token(&original.token).await.unwrap();
    assert!(found.rotated);

    assert_eq!(store.revoke_chain(&original.chain_id).await.unwrap(), 1);
    assert_eq!(store.refresh_token_count(), 0);
    assert!(store.rotate_refresh_token(&next.token, "app1", None).await.is_err());
    assert_eq!(store.revoke_chain("unknown-chain").await.unwrap(), 0);
}

#[tokio::test]
async fn test_chain_binding_for_codes() {
    let clock = clock();
    let store = InMemoryGrantStore::new(clock.clone());
    let grant = profile_grant(&clock);
    let code = store.issue_code(grant).await.unwrap();
    assert!(store.chain_for_code(&code).await.is_none());
    store.bind_chain_to_code(&code, "chain-1").await.unwrap();
    assert_eq!(store.chain_for_code(&code).await.as_deref(), Some("chain-1"));
    assert!(store.bind_chain_to_code("missing", "chain-1").await.is_err());
}

#[tokio::test]
async fn test_claims_provider_filters_by_scope() {
    let provider = users();
    let scopes = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let claims = provider.resolve_claims("alice", &scopes(&["openid"])).await.unwrap();
    assert!(claims.is_empty());

    let claims = provider.resolve_claims("alice", &scopes(&["openid", "profile"])).await.unwrap();
    assert_eq!(claims.len(), 2);
    assert_eq!(claims["name"], "Alice Smith");

    let claims = provider.resolve_claims("alice", &scopes(&["phone", "email"])).await.unwrap();
    let names: Vec<_> = claims.keys().cloned().collect();
    assert_eq!(names, vec!["email", "email_verified", "phone_number"]);

    let err = provider.resolve_claims("bob", &scopes(&["openid"])).await.unwrap_err();
    assert_eq!(err, GrantError::UnknownSubject);

    let provider = InMemoryClaimsProvider::default();
    provider.insert(UserProfile::new("bob").with_claim("locale", "fr-FR"));
    let claims = provider.resolve_claims("bob", &scopes(&["profile"])).await.unwrap();
    assert_eq!(claims["locale"], "fr-FR");
}

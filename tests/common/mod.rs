#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use starberry_idp::idp_core::crypto::pkce_code_challenge;
use starberry_idp::{
    AuthorizationGrant, Clock, ClientConfig, GrantType, IdentityServer, IdpConfig,
    InMemoryClaimsProvider, InMemoryClientRegistry, InMemoryGrantStore, KeyMaterial, ManualClock,
    RefreshToken, SigningAlgorithm, SigningKey, UserProfile,
};

pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
pub const APP_SECRET: &str = "app1-secret";
pub const SERVICE_SECRET: &str = "svc-secret";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn challenge() -> String {
    pkce_code_challenge(VERIFIER)
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()))
}

pub fn config() -> IdpConfig {
    IdpConfig::builder()
        .issuer("https://id.test")
        .client(ClientConfig {
            client_id: "app1".into(),
            client_secret: Some(APP_SECRET.into()),
            grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            redirect_uris: vec!["https://app/cb".into()],
            scopes: vec!["openid".into(), "profile".into(), "email".into(), "api".into()],
            ..ClientConfig::default()
        })
        .client(ClientConfig {
            client_id: "spa".into(),
            grant_types: vec![GrantType::AuthorizationCode],
            redirect_uris: vec!["https://spa/cb".into(), "https://spa/silent".into()],
            scopes: vec!["openid".into(), "profile".into()],
            require_pkce: true,
            ..ClientConfig::default()
        })
        .client(ClientConfig {
            client_id: "svc".into(),
            client_secret: Some(SERVICE_SECRET.into()),
            grant_types: vec![GrantType::ClientCredentials],
            scopes: vec!["api.read".into(), "api.write".into()],
            ..ClientConfig::default()
        })
        .build()
        .unwrap()
}

pub fn users() -> InMemoryClaimsProvider {
    InMemoryClaimsProvider::new(vec![
        UserProfile::new("alice")
            .with_claim("name", "Alice Smith")
            .with_claim("given_name", "Alice")
            .with_claim("email", "alice@example.com")
            .with_claim("email_verified", true)
            .with_claim("phone_number", "+1 555 0100"),
    ])
}

/// Server signing with a fixed `k1` key so assertions can name it.
pub fn server_with(config: IdpConfig, clock: Arc<ManualClock>) -> IdentityServer {
    let key = SigningKey::generate_with_id("k1", SigningAlgorithm::EdDSA, clock.now()).unwrap();
    let keys = Arc::new(KeyMaterial::with_active(key, config.key_rotation_grace(), clock.clone()));
    let clients = Arc::new(InMemoryClientRegistry::from_config(&config));
    let grants = Arc::new(InMemoryGrantStore::new(clock.clone()));
    IdentityServer::new(config, clients, grants, Arc::new(users()), keys, clock)
}

pub fn server(clock: Arc<ManualClock>) -> IdentityServer {
    server_with(config(), clock)
}

/// Runs an authorization request for `alice` and returns the issued code.
pub async fn authorize_code(server: &IdentityServer, query: &str) -> String {
    let outcome = server.handle_authorize(query, "alice").await;
    outcome.code().expect("authorization should succeed").to_string()
}

pub fn app1_query(scope: &str) -> String {
    format!(
        "client_id=app1&redirect_uri=https%3A%2F%2Fapp%2Fcb&response_type=code&scope={}\
         &state=xyz&code_challenge={}&code_challenge_method=S256",
        scope.replace(' ', "+"),
        challenge()
    )
}

pub fn app1_exchange_form(code: &str) -> String {
    format!(
        "grant_type=authorization_code&code={}&redirect_uri=https%3A%2F%2Fapp%2Fcb\
         &client_id=app1&client_secret={}&code_verifier={}",
        code, APP_SECRET, VERIFIER
    )
}

/// A five-minute `profile` grant for app1 and alice.
pub fn profile_grant(clock: &ManualClock) -> AuthorizationGrant {
    let scopes = vec!["profile".into()];
    let lifetime = chrono::Duration::minutes(5);
    AuthorizationGrant::new("app1", "https://app/cb", "alice", scopes, clock.now(), lifetime)
}

/// The first token of a new `api` chain for app1 and alice.
pub fn api_chain(clock: &ManualClock, lifetime: chrono::Duration) -> RefreshToken {
    RefreshToken::new("app1", "alice", vec!["api".into()], clock.now(), lifetime)
}

//! Wires the registry, stores, keys and both endpoints into one handle.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, info};

use super::authorize::{AuthorizationEndpoint, AuthorizationOutcome, AuthorizationRequest};
use super::clock::{Clock, SystemClock};
use super::config::{IdpConfig, MAX_DURATION_SECS};
use super::discovery::DiscoveryDocument;
use super::error::{ErrorResponse, IdpError};
use super::jwks::JwkSet;
use super::key_material::KeyMaterial;
use super::memory::{InMemoryClaimsProvider, InMemoryClientRegistry, InMemoryGrantStore};
use super::provider::{ClaimsProvider, ClientRegistry, GrantStore};
use super::token_endpoint::{TokenEndpoint, TokenRequest};
use super::token_issuer::TokenIssuer;
use super::types::TokenResponse;

/// Entry point an HTTP layer calls into. Framework agnostic: it takes raw
/// query strings and form bodies and returns redirect or JSON descriptors.
pub struct IdentityServer<
    C: ClientRegistry = InMemoryClientRegistry,
    G: GrantStore = InMemoryGrantStore,
    P: ClaimsProvider = InMemoryClaimsProvider,
> {
    config: Arc<IdpConfig>,
    clients: Arc<C>,
    grants: Arc<G>,
    keys: Arc<KeyMaterial>,
    issuer: Arc<TokenIssuer>,
    authorize: AuthorizationEndpoint<C, G>,
    token: TokenEndpoint<C, G, P>,
}

impl IdentityServer {
    /// In-memory server for `config`, signing with a freshly generated key.
    pub fn from_config(config: IdpConfig, users: InMemoryClaimsProvider) -> Result<Self, IdpError> {
        Self::from_config_with_clock(config, users, Arc::new(SystemClock))
    }

    pub fn from_config_with_clock(
        config: IdpConfig,
        users: InMemoryClaimsProvider,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IdpError> {
        config.validate()?;
        let grace = config.key_rotation_grace();
        let keys = KeyMaterial::generate(config.signing_algorithm, grace, clock.clone())?;
        let clients = InMemoryClientRegistry::from_config(&config);
        let grants = InMemoryGrantStore::new(clock.clone());
        info!(issuer = %config.issuer, clients = clients.len(), "identity server configured");
        Ok(Self::new(
            config,
            Arc::new(clients),
            Arc::new(grants),
            Arc::new(users),
            Arc::new(keys),
            clock,
        ))
    }
}

impl<C: ClientRegistry, G: GrantStore, P: ClaimsProvider> IdentityServer<C, G, P> {
    pub fn new(
        config: IdpConfig,
        clients: Arc<C>,
        grants: Arc<G>,
        claims: Arc<P>,
        keys: Arc<KeyMaterial>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = Arc::new(config);
        let issuer = Arc::new(TokenIssuer::from_config(&config, keys.clone(), clock.clone()));
        let authorize = AuthorizationEndpoint::new(
            clients.clone(),
            grants.clone(),
            clock.clone(),
            config.clone(),
        );
        let token = TokenEndpoint::new(
            clients.clone(),
            grants.clone(),
            claims,
            issuer.clone(),
            clock,
            config.clone(),
        );
        Self { config, clients, grants, keys, issuer, authorize, token }
    }

    pub fn config(&self) -> &IdpConfig {
        &self.config
    }

    pub fn clients(&self) -> &Arc<C> {
        &self.clients
    }

    pub fn grants(&self) -> &Arc<G> {
        &self.grants
    }

    pub fn keys(&self) -> &Arc<KeyMaterial> {
        &self.keys
    }

    pub fn issuer(&self) -> &Arc<TokenIssuer> {
        &self.issuer
    }

    pub fn authorization_endpoint(&self) -> &AuthorizationEndpoint<C, G> {
        &self.authorize
    }

    pub fn token_endpoint(&self) -> &TokenEndpoint<C, G, P> {
        &self.token
    }

    /// Authorization request from a raw query string, for an already
    /// authenticated `subject`.
    pub async fn handle_authorize(&self, query: &str, subject: &str) -> AuthorizationOutcome {
        match AuthorizationRequest::from_query(query) {
            Ok(request) => self.authorize.authorize(&request, subject).await,
            Err(err) => AuthorizationOutcome::Error(err.into_response()),
        }
    }

    /// Token request from a form body and an optional `Authorization` header.
    pub async fn handle_token(
        &self,
        form: &str,
        authorization: Option<&str>,
    ) -> Result<TokenResponse, ErrorResponse> {
        let request = TokenRequest::from_form(form).and_then(|request| match authorization {
            Some(header) => request.with_basic_auth(header),
            None => Ok(request),
        });
        match request {
            Ok(request) => self.token.handle(&request).await,
            Err(err) => Err(err.into_response()),
        }
    }

    pub async fn jwks(&self) -> JwkSet {
        self.keys.jwks().await
    }

    pub async fn discovery(&self) -> DiscoveryDocument {
        let jwks = self.jwks().await;
        let algorithms: Vec<&str> = jwks.keys.iter().map(|k| k.alg.as_str()).collect();
        DiscoveryDocument::new(&self.config, &algorithms)
    }

    /// One maintenance pass: evict expired grants and drop retired keys.
    pub async fn sweep(&self) -> usize {
        let evicted = self.grants.evict_expired().await;
        let pruned = self.keys.prune().await;
        debug!(evicted, pruned, "maintenance sweep");
        evicted + pruned
    }

    /// Replace the active signing key with a freshly generated one.
    pub async fn rotate_signing_key(&self) -> Result<String, IdpError> {
        Ok(self.keys.rotate_generated(self.config.signing_algorithm).await?)
    }

    /// Background eviction and, when configured, scheduled key rotation.
    /// Neither affects correctness; abort the handle to stop.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let every = period(server.config.eviction_interval_secs);
            let mut eviction = interval_at(Instant::now() + every, every);
            let mut rotation = server.config.key_rotation_interval_secs.map(|secs| {
                let every = period(secs);
                interval_at(Instant::now() + every, every)
            });
            loop {
                tokio::select! {
                    _ = eviction.tick() => {
                        server.sweep().await;
                    }
                    _ = async {
                        match rotation.as_mut() {
                            Some(timer) => {
                                timer.tick().await;
                            }
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        match server.rotate_signing_key().await {
                            Ok(kid) => info!(kid = %kid, "scheduled signing key rotation"),
                            Err(err) => {
                                error!(error = %err, "scheduled signing key rotation failed")
                            }
                        }
                    }
                }
            }
        })
    }
}

/// Timer period; tokio rejects zero and overflows past the far future.
fn period(secs: u64) -> StdDuration {
    StdDuration::from_secs(secs.clamp(1, MAX_DURATION_SECS))
}

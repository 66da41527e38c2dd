//! In-memory default implementations for the identity core traits.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tracing::{debug, warn};

use super::clock::Clock;
use super::config::IdpConfig;
use super::crypto::random_token;
use super::error::{ClientError, GrantError, IdpError};
use super::provider::{ClaimsProvider, ClientRegistry, GrantStore};
use super::types::{AuthorizationGrant, Claims, Client, RefreshToken, identity_scope_claims};

/// Attempts at drawing an unused identifier before giving up.
const MAX_ID_ATTEMPTS: usize = 4;

#[derive(Clone)]
pub struct InMemoryClientRegistry {
    clients: Arc<DashMap<String, Client>>,
}

impl InMemoryClientRegistry {
    /// Creates a registry with an initial set of clients.
    pub fn new(initial_clients: Vec<Client>) -> Self {
        let map = DashMap::new();
        for client in initial_clients {
            map.insert(client.id.clone(), client);
        }
        Self { clients: Arc::new(map) }
    }

    /// Creates a registry from the configured client registrations.
    pub fn from_config(config: &IdpConfig) -> Self {
        Self::new(config.clients.iter().map(|c| c.to_client()).collect())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl ClientRegistry for InMemoryClientRegistry {
    async fn lookup(&self, client_id: &str) -> Result<Client, ClientError> {
        self.clients
            .get(client_id)
            .map(|entry| entry.value().clone())
            .ok_or(ClientError::UnknownClient)
    }
}

struct CodeEntry {
    grant: AuthorizationGrant,
    /// Refresh token chain issued when this code was redeemed.
    chain_id: Option<String>,
}

struct ChainState {
    revoked: bool,
    tokens: Vec<String>,
    expires_at: DateTime<Utc>,
}

/// DashMap-backed grant store. Each entry is guarded by its shard lock, so
/// consuming a code or rotating a token is a single check-and-set.
///
/// Lock order: a refresh token entry may be held while reading a chain,
/// never the other way around.
#[derive(Clone)]
pub struct InMemoryGrantStore {
    codes: Arc<DashMap<String, CodeEntry>>,
    refresh_tokens: Arc<DashMap<String, RefreshToken>>,
    chains: Arc<DashMap<String, ChainState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryGrantStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            codes: Arc::new(DashMap::new()),
            refresh_tokens: Arc::new(DashMap::new()),
            chains: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Number of stored codes, consumed ones included.
    pub fn code_count(&self) -> usize {
        self.codes.len()
    }

    pub fn refresh_token_count(&self) -> usize {
        self.refresh_tokens.len()
    }

    fn is_chain_revoked(&self, chain_id: &str) -> bool {
        self.chains.get(chain_id).map(|c| c.revoked).unwrap_or(false)
    }

    fn revoke_chain_now(&self, chain_id: &str) -> usize {
        let tokens = match self.chains.get_mut(chain_id) {
            Some(mut chain) => {
                chain.revoked = true;
                std::mem::take(&mut chain.tokens)
            }
            None => return 0,
        };
        let mut dropped = 0;
        for token in tokens {
            if let Some((_, removed)) = self.refresh_tokens.remove(&token) {
                if !removed.rotated {
                    dropped += 1;
                }
            }
        }
        dropped
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn issue_code(&self, mut grant: AuthorizationGrant) -> Result<String, IdpError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let code = random_token()?;
            if let Entry::Vacant(slot) = self.codes.entry(code.clone()) {
                grant.code = code.clone();
                debug!(
                    client_id = %grant.client_id,
                    expires_at = %grant.expires_at,
                    "stored authorization code"
                );
                slot.insert(CodeEntry { grant, chain_id: None });
                return Ok(code);
            }
        }
        Err(IdpError::Store("could not allocate a unique authorization code".into()))
    }

    async fn consume_code(&self, code: &str) -> Result<AuthorizationGrant, GrantError> {
        let now = self.clock.now();
        let mut entry = self.codes.get_mut(code).ok_or(GrantError::NotFound)?;
        if entry.grant.consumed {
            return Err(GrantError::AlreadyConsumed);
        }
        if entry.grant.is_expired(now) {
            return Err(GrantError::Expired);
        }
        entry.grant.consumed = true;
        Ok(entry.grant.clone())
    }

    async fn bind_chain_to_code(&self, code: &str, chain_id: &str) -> Result<(), IdpError> {
        let mut entry = self.codes.get_mut(code).ok_or(GrantError::NotFound)?;
        entry.chain_id = Some(chain_id.to_string());
        Ok(())
    }

    async fn chain_for_code(&self, code: &str) -> Option<String> {
        self.codes.get(code).and_then(|entry| entry.chain_id.clone())
    }

    async fn issue_refresh_token(&self, mut token: RefreshToken) -> Result<RefreshToken, IdpError> {
        let mut stored = None;
        for _ in 0..MAX_ID_ATTEMPTS {
            let value = random_token()?;
            if let Entry::Vacant(slot) = self.refresh_tokens.entry(value.clone()) {
                token.token = value;
                slot.insert(token.clone());
                stored = Some(token);
                break;
            }
        }
        let token = stored
            .ok_or_else(|| IdpError::Store("could not allocate a unique refresh token".into()))?;
        self.chains
            .entry(token.chain_id.clone())
            .or_insert_with(|| ChainState {
                revoked: false,
                tokens: Vec::new(),
                expires_at: token.expires_at,
            })
            .tokens
            .push(token.token.clone());
        Ok(token)
    }

    async fn find_refresh_token(&self, token: &str) -> Option<RefreshToken> {
        self.refresh_tokens.get(token).map(|entry| entry.value().clone())
    }

    async fn rotate_refresh_token(
        &self,
        old_token: &str,
        client_id: &str,
        requested_scopes: Option<&[String]>,
    ) -> Result<RefreshToken, IdpError> {
        let now = self.clock.now();
        let (chain_id, successor) = {
            let mut entry = self.refresh_tokens.get_mut(old_token).ok_or(GrantError::NotFound)?;
            if entry.client_id != client_id {
                return Err(GrantError::ClientMismatch.into());
            }
            if self.is_chain_revoked(&entry.chain_id) {
                return Err(GrantError::Revoked.into());
            }
            if entry.rotated {
                (entry.chain_id.clone(), None)
            } else if entry.is_expired(now) {
                return Err(GrantError::Expired.into());
            } else if requested_scopes
                .is_some_and(|wanted| !wanted.iter().all(|s| entry.scopes.contains(s)))
            {
                let message = "refresh scope exceeds the original grant";
                return Err(IdpError::InvalidScope(message.into()));
            } else {
                entry.rotated = true;
                (entry.chain_id.clone(), Some(entry.successor(now)))
            }
        };
        match successor {
            Some(next) => {
                let next = self.issue_refresh_token(next).await?;
                // The chain may have been revoked while the successor was stored.
                if self.is_chain_revoked(&chain_id) {
                    self.refresh_tokens.remove(&next.token);
                    return Err(GrantError::Revoked.into());
                }
                Ok(next)
            }
            None => {
                let dropped = self.revoke_chain_now(&chain_id);
                warn!(
                    chain_id = %chain_id,
                    client_id,
                    dropped,
                    "rotated-out refresh token reused; chain revoked"
                );
                Err(GrantError::Revoked.into())
            }
        }
    }

    async fn revoke_chain(&self, chain_id: &str) -> Result<usize, IdpError> {
        Ok(self.revoke_chain_now(chain_id))
    }

    async fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.codes.len() + self.refresh_tokens.len() + self.chains.len();
        self.codes.retain(|_, entry| !entry.grant.is_expired(now));
        self.refresh_tokens.retain(|_, token| !token.is_expired(now));
        self.chains.retain(|_, chain| now < chain.expires_at);
        let after = self.codes.len() + self.refresh_tokens.len() + self.chains.len();
        let evicted = before.saturating_sub(after);
        if evicted > 0 {
            debug!(evicted, "evicted expired grants");
        }
        evicted
    }
}

/// A subject and the identity claims held for it.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub subject: String,
    pub claims: Claims,
}

impl UserProfile {
    pub fn new(subject: impl Into<String>) -> Self {
        Self { subject: subject.into(), claims: Claims::new() }
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.claims.insert(name.into(), value.into());
        self
    }
}

/// Claims provider over a fixed set of user profiles, releasing only the
/// claims covered by the granted identity scopes.
#[derive(Clone, Default)]
pub struct InMemoryClaimsProvider {
    users: Arc<DashMap<String, UserProfile>>,
}

impl InMemoryClaimsProvider {
    pub fn new(users: Vec<UserProfile>) -> Self {
        let map = DashMap::new();
        for user in users {
            map.insert(user.subject.clone(), user);
        }
        Self { users: Arc::new(map) }
    }

    pub fn insert(&self, user: UserProfile) {
        self.users.insert(user.subject.clone(), user);
    }
}

#[async_trait]
impl ClaimsProvider for InMemoryClaimsProvider {
    async fn resolve_claims(&self, subject: &str, scopes: &[String]) -> Result<Claims, GrantError> {
        let user = self.users.get(subject).ok_or(GrantError::UnknownSubject)?;
        let released: HashSet<&str> = scopes
            .iter()
            .flat_map(|s| identity_scope_claims(s).iter().copied())
            .collect();
        Ok(user
            .claims
            .iter()
            .filter(|(name, _)| released.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect())
    }
}

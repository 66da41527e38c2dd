//! Storage and identity seams of the core.
//!
//! Every backend (in-memory, SQL, cache) implements these traits; the
//! endpoint logic only ever talks to them.

use async_trait::async_trait;

use super::error::{ClientError, GrantError, IdpError};
use super::types::{AuthorizationGrant, Claims, Client, RefreshToken};

/// Read-only lookup of registered clients.
#[async_trait]
pub trait ClientRegistry: Send + Sync + 'static {
    /// Retrieves a client by its identifier.
    async fn lookup(&self, client_id: &str) -> Result<Client, ClientError>;

    /// Constant-time secret check. Unknown clients and public clients never match.
    async fn validate_secret(&self, client_id: &str, secret: &str) -> bool {
        match self.lookup(client_id).await {
            Ok(client) => client.verify_secret(secret),
            Err(_) => false,
        }
    }

    /// Exact-match redirect check.
    async fn is_redirect_allowed(&self, client_id: &str, uri: &str) -> bool {
        match self.lookup(client_id).await {
            Ok(client) => client.allows_redirect(uri),
            Err(_) => false,
        }
    }
}

/// Short-lived store of authorization codes and refresh token chains.
///
/// Implementations must make [`consume_code`](GrantStore::consume_code) and
/// [`rotate_refresh_token`](GrantStore::rotate_refresh_token) linearizable:
/// concurrent attempts on the same identifier produce exactly one winner.
/// Entries past expiry are treated as absent at lookup time.
#[async_trait]
pub trait GrantStore: Send + Sync + 'static {
    /// Stores the grant under a freshly generated code and returns the code.
    async fn issue_code(&self, grant: AuthorizationGrant) -> Result<String, IdpError>;

    /// Redeems a code exactly once.
    async fn consume_code(&self, code: &str) -> Result<AuthorizationGrant, GrantError>;

    /// Records the refresh token chain that was issued from a redeemed code,
    /// so that a replay of the code can revoke it.
    async fn bind_chain_to_code(&self, code: &str, chain_id: &str) -> Result<(), IdpError>;

    /// Chain issued from a redeemed code, if any.
    async fn chain_for_code(&self, code: &str) -> Option<String>;

    /// Stores the token under a freshly generated value and returns the stored token.
    async fn issue_refresh_token(&self, token: RefreshToken) -> Result<RefreshToken, IdpError>;

    /// Looks up a stored refresh token without rotating it.
    async fn find_refresh_token(&self, token: &str) -> Option<RefreshToken>;

    /// Exchanges a live refresh token for its successor. Presenting a token
    /// that was already rotated out revokes its whole chain.
    ///
    /// `requested_scopes` must be a subset of the chain's scopes. It is only
    /// checked once the token is known to be live, and a rejected request
    /// leaves the token unrotated.
    async fn rotate_refresh_token(
        &self,
        old_token: &str,
        client_id: &str,
        requested_scopes: Option<&[String]>,
    ) -> Result<RefreshToken, IdpError>;

    /// Invalidates every token in the chain. Returns how many live tokens were dropped.
    async fn revoke_chain(&self, chain_id: &str) -> Result<usize, IdpError>;

    /// Drops expired entries. Returns how many were removed.
    async fn evict_expired(&self) -> usize;
}

/// Source of identity claims for authenticated subjects.
#[async_trait]
pub trait ClaimsProvider: Send + Sync + 'static {
    /// Claims released for `subject` under the granted `scopes`.
    async fn resolve_claims(&self, subject: &str, scopes: &[String]) -> Result<Claims, GrantError>;
}

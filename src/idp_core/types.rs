//! Identity core data model: clients, authorization grants, refresh tokens
//! and the token endpoint response.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::clock::saturating_expiry;
use super::crypto::{constant_time_eq, hash_secret};

/// Identity claims keyed by claim name.
pub type Claims = BTreeMap<String, serde_json::Value>;

/// Grant types a client may be allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
            GrantType::ClientCredentials => "client_credentials",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "refresh_token" => Ok(GrantType::RefreshToken),
            "client_credentials" => Ok(GrantType::ClientCredentials),
            other => Err(other.to_string()),
        }
    }
}

/// PKCE transformation applied to the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    S256,
    #[serde(rename = "plain")]
    Plain,
}

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::S256 => "S256",
            CodeChallengeMethod::Plain => "plain",
        }
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(CodeChallengeMethod::S256),
            "plain" => Ok(CodeChallengeMethod::Plain),
            other => Err(other.to_string()),
        }
    }
}

/// A registered OAuth 2.0 client. Immutable once loaded into a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client identifier.
    pub id: String,
    /// SHA-256 hash of the client secret; `None` for public clients.
    pub secret_hash: Option<String>,
    /// Grant types this client may use.
    pub grant_types: HashSet<GrantType>,
    /// Redirect URIs, matched exactly.
    pub redirect_uris: HashSet<String>,
    /// Scopes this client may request.
    pub scopes: HashSet<String>,
    /// Whether authorization requests must carry a PKCE challenge.
    pub require_pkce: bool,
}

impl Client {
    /// Creates a public client with no grants, redirects or scopes.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret_hash: None,
            grant_types: HashSet::new(),
            redirect_uris: HashSet::new(),
            scopes: HashSet::new(),
            require_pkce: false,
        }
    }

    /// Hashes and attaches a client secret, making this a confidential client.
    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret_hash = Some(hash_secret(secret));
        self
    }

    pub fn with_secret_hash(mut self, hash: impl Into<String>) -> Self {
        self.secret_hash = Some(hash.into());
        self
    }

    pub fn with_grant_types(mut self, grants: impl IntoIterator<Item = GrantType>) -> Self {
        self.grant_types.extend(grants);
        self
    }

    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uris.insert(uri.into());
        self
    }

    pub fn with_scopes<S: Into<String>>(mut self, scopes: impl IntoIterator<Item = S>) -> Self {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn with_require_pkce(mut self, require: bool) -> Self {
        self.require_pkce = require;
        self
    }

    pub fn is_confidential(&self) -> bool {
        self.secret_hash.is_some()
    }

    pub fn allows_grant(&self, grant: GrantType) -> bool {
        self.grant_types.contains(&grant)
    }

    /// Exact string match; no prefix or wildcard matching.
    pub fn allows_redirect(&self, uri: &str) -> bool {
        self.redirect_uris.contains(uri)
    }

    pub fn allows_scopes(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|s| self.scopes.contains(s))
    }

    /// Constant-time secret check. Public clients never match a secret.
    pub fn verify_secret(&self, secret: &str) -> bool {
        match &self.secret_hash {
            Some(hash) => constant_time_eq(&hash_secret(secret), hash),
            None => false,
        }
    }
}

/// A recorded authorization event, redeemable exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    /// Opaque code; assigned by the grant store on issue.
    pub code: String,
    pub client_id: String,
    /// Redirect URI the code was delivered to.
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Authenticated end user.
    pub subject: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    /// OIDC nonce echoed into the ID token.
    pub nonce: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set once the code has been redeemed.
    pub consumed: bool,
}

impl AuthorizationGrant {
    /// Builds an unconsumed grant valid for `lifetime` from `now`.
    pub fn new(
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        subject: impl Into<String>,
        scopes: Vec<String>,
        now: DateTime<Utc>,
        lifetime: Duration,
    ) -> Self {
        Self {
            code: String::new(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
            subject: subject.into(),
            code_challenge: None,
            code_challenge_method: None,
            nonce: None,
            issued_at: now,
            expires_at: saturating_expiry(now, lifetime),
            consumed: false,
        }
    }

    pub fn with_pkce(mut self, challenge: String, method: CodeChallengeMethod) -> Self {
        self.code_challenge = Some(challenge);
        self.code_challenge_method = Some(method);
        self
    }

    pub fn with_nonce(mut self, nonce: Option<String>) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A refresh token and its position in a rotation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Opaque token value; assigned by the grant store on issue.
    pub token: String,
    pub client_id: String,
    pub subject: String,
    pub scopes: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Shared by every token rotated from the same original grant.
    pub chain_id: String,
    /// Token this one was rotated from.
    pub parent: Option<String>,
    /// Set once this token has been exchanged for a successor.
    pub rotated: bool,
}

impl RefreshToken {
    /// Starts a new chain.
    pub fn new(
        client_id: impl Into<String>,
        subject: impl Into<String>,
        scopes: Vec<String>,
        now: DateTime<Utc>,
        lifetime: Duration,
    ) -> Self {
        Self {
            token: String::new(),
            client_id: client_id.into(),
            subject: subject.into(),
            scopes,
            issued_at: now,
            expires_at: saturating_expiry(now, lifetime),
            chain_id: uuid::Uuid::new_v4().to_string(),
            parent: None,
            rotated: false,
        }
    }

    /// Successor link in the same chain. The chain keeps its absolute expiry.
    pub fn successor(&self, now: DateTime<Utc>) -> Self {
        Self {
            token: String::new(),
            client_id: self.client_id.clone(),
            subject: self.subject.clone(),
            scopes: self.scopes.clone(),
            issued_at: now,
            expires_at: self.expires_at,
            chain_id: self.chain_id.clone(),
            parent: Some(self.token.clone()),
            rotated: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Successful token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Split a space-delimited scope parameter, dropping empty entries and duplicates.
pub fn parse_scope(scope: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    scope
        .split(' ')
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(*s))
        .map(str::to_string)
        .collect()
}

/// OIDC identity scopes this core understands.
pub const IDENTITY_SCOPES: &[&str] = &["openid", "profile", "email", "address", "phone"];

/// Claims released under a standard identity scope.
pub fn identity_scope_claims(scope: &str) -> &'static [&'static str] {
    match scope {
        "openid" => &[],
        "profile" => &[
            "name",
            "family_name",
            "given_name",
            "middle_name",
            "nickname",
            "preferred_username",
            "profile",
            "picture",
            "website",
            "gender",
            "birthdate",
            "zoneinfo",
            "locale",
            "updated_at",
        ],
        "email" => &["email", "email_verified"],
        "address" => &["address"],
        "phone" => &["phone_number", "phone_number_verified"],
        _ => &[],
    }
}

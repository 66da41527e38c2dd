//! JWT issuance and verification for access and ID tokens.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Header, Validation, decode, decode_header, encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::clock::Clock;
use super::config::IdpConfig;
use super::error::{ConfigError, IdpError, KeyError, TokenError};
use super::key_material::{KeyMaterial, KeyResolver};
use super::types::Claims;

/// Registered claim names an identity claim may not override.
const RESERVED_CLAIMS: &[&str] = &["iss", "sub", "aud", "exp", "iat", "nbf", "jti", "nonce", "azp"];

/// Payload of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub client_id: String,
    pub scope: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Payload of an OpenID Connect ID token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub claims: Claims,
}

/// Claims sets carrying an expiry the verifier checks against its clock.
pub trait ExpiringClaims {
    fn exp(&self) -> i64;
}

impl ExpiringClaims for AccessTokenClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

impl ExpiringClaims for IdTokenClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

/// A signed, self-contained token. Never persisted by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Compact JWS serialization.
    pub token: String,
    /// `jti` claim.
    pub token_id: String,
    /// `kid` header of the signing key.
    pub key_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IssuedToken {
    pub fn lifetime_secs(&self) -> u64 {
        (self.expires_at - self.issued_at).num_seconds().max(0) as u64
    }
}

/// Signs access and ID tokens with the active key of a [`KeyMaterial`].
pub struct TokenIssuer {
    issuer: String,
    resource_audience: Option<String>,
    keys: Arc<KeyMaterial>,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    /// Access tokens use the client id as audience.
    pub fn new(issuer: impl Into<String>, keys: Arc<KeyMaterial>, clock: Arc<dyn Clock>) -> Self {
        Self { issuer: issuer.into(), resource_audience: None, keys, clock }
    }

    pub fn from_config(config: &IdpConfig, keys: Arc<KeyMaterial>, clock: Arc<dyn Clock>) -> Self {
        let resource_audience = config.static_audience.then(|| config.access_token_audience(""));
        Self { issuer: config.issuer.clone(), resource_audience, keys, clock }
    }

    /// Access tokens use this fixed audience instead of the client id.
    pub fn with_resource_audience(mut self, audience: impl Into<String>) -> Self {
        self.resource_audience = Some(audience.into());
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn keys(&self) -> &Arc<KeyMaterial> {
        &self.keys
    }

    /// Audience an access token for `client_id` carries.
    pub fn access_token_audience(&self, client_id: &str) -> String {
        self.resource_audience.clone().unwrap_or_else(|| client_id.to_string())
    }

    #[instrument(skip(self, scopes), level = "debug")]
    pub async fn issue_access_token(
        &self,
        subject: &str,
        client_id: &str,
        scopes: &[String],
        lifetime: Duration,
    ) -> Result<IssuedToken, IdpError> {
        check_common(subject, client_id, lifetime)?;
        if let Some(bad) = scopes.iter().find(|s| s.is_empty() || s.contains(char::is_whitespace)) {
            return Err(IdpError::InvalidRequest(format!("malformed scope `{}`", bad)));
        }
        let now = self.clock.now();
        let expires_at = expiry(now, lifetime)?;
        let claims = AccessTokenClaims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            aud: self.access_token_audience(client_id),
            client_id: client_id.to_string(),
            scope: scopes.join(" "),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let jti = claims.jti.clone();
        self.sign(&claims, "at+jwt", jti, now, expires_at).await
    }

    #[instrument(skip(self, claims, nonce), level = "debug")]
    pub async fn issue_id_token(
        &self,
        subject: &str,
        client_id: &str,
        claims: &Claims,
        nonce: Option<&str>,
        lifetime: Duration,
    ) -> Result<IssuedToken, IdpError> {
        check_common(subject, client_id, lifetime)?;
        if let Some(reserved) = claims.keys().find(|k| RESERVED_CLAIMS.contains(&k.as_str())) {
            return Err(IdpError::InvalidRequest(format!("claim `{}` is reserved", reserved)));
        }
        let now = self.clock.now();
        let expires_at = expiry(now, lifetime)?;
        let payload = IdTokenClaims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            aud: client_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            nonce: nonce.map(str::to_string),
            claims: claims.clone(),
        };
        let jti = payload.jti.clone();
        self.sign(&payload, "JWT", jti, now, expires_at).await
    }

    async fn sign<T: Serialize>(
        &self,
        payload: &T,
        typ: &str,
        token_id: String,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedToken, IdpError> {
        let key = self.keys.active_key().await?;
        let mut header = Header::new(key.algorithm().jwt_algorithm());
        header.kid = Some(key.kid().to_string());
        header.typ = Some(typ.to_string());
        let token = encode(&header, payload, key.encoding_key())
            .map_err(|e| KeyError::Signing(e.to_string()))?;
        debug!(kid = key.kid(), typ, "signed token");
        Ok(IssuedToken {
            token,
            token_id,
            key_id: key.kid().to_string(),
            issued_at: now,
            expires_at,
        })
    }

    /// Verifier for tokens minted by this issuer for `audience`.
    pub fn verifier(&self, audience: impl Into<String>) -> TokenVerifier<KeyMaterial> {
        TokenVerifier::new(self.keys.clone(), self.issuer.clone(), audience, self.clock.clone())
    }

    pub async fn verify_access_token(
        &self,
        token: &str,
        audience: &str,
    ) -> Result<AccessTokenClaims, TokenError> {
        self.verifier(audience).verify(token).await
    }

    pub async fn verify_id_token(
        &self,
        token: &str,
        client_id: &str,
    ) -> Result<IdTokenClaims, TokenError> {
        self.verifier(client_id).verify(token).await
    }
}

fn check_common(subject: &str, client_id: &str, lifetime: Duration) -> Result<(), IdpError> {
    if subject.trim().is_empty() {
        return Err(IdpError::InvalidRequest("empty subject".into()));
    }
    if client_id.trim().is_empty() {
        return Err(IdpError::InvalidRequest("empty client id".into()));
    }
    if lifetime <= Duration::zero() {
        return Err(IdpError::InvalidRequest("non-positive token lifetime".into()));
    }
    Ok(())
}

fn expiry(now: DateTime<Utc>, lifetime: Duration) -> Result<DateTime<Utc>, IdpError> {
    now.checked_add_signed(lifetime)
        .ok_or_else(|| ConfigError::Invalid("token lifetime out of range".into()).into())
}

/// Verifies tokens using only the `kid` header, the signature and the
/// registered claims; no store lookup is involved.
pub struct TokenVerifier<R: KeyResolver> {
    resolver: Arc<R>,
    issuer: String,
    audience: String,
    clock: Arc<dyn Clock>,
}

impl<R: KeyResolver> TokenVerifier<R> {
    pub fn new(
        resolver: Arc<R>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { resolver, issuer: issuer.into(), audience: audience.into(), clock }
    }

    pub async fn verify<C>(&self, token: &str) -> Result<C, TokenError>
    where
        C: DeserializeOwned + ExpiringClaims,
    {
        let header = decode_header(token).map_err(|_| TokenError::Malformed)?;
        let kid = header.kid.ok_or(TokenError::MissingKeyId)?;
        let (key, algorithm) = self
            .resolver
            .resolve(&kid)
            .await
            .map_err(|_| TokenError::UnknownKey(kid.clone()))?;

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.required_spec_claims =
            ["exp", "iss", "aud", "sub"].iter().map(|c| c.to_string()).collect();
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);

        let data = decode::<C>(token, &key, &validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            ErrorKind::InvalidAudience => TokenError::AudienceMismatch,
            ErrorKind::InvalidIssuer => TokenError::IssuerMismatch,
            _ => TokenError::Malformed,
        })?;
        if data.claims.exp() <= self.clock.now().timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(data.claims)
    }
}

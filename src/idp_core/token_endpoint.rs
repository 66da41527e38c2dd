//! Token endpoint: authenticates the client and redeems a grant for tokens.

use std::collections::HashSet;
use std::str::Utf8Error;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{info, instrument, warn};

use super::clock::Clock;
use super::config::IdpConfig;
use super::crypto::verify_pkce;
use super::error::{ClientError, ErrorResponse, GrantError, IdpError};
use super::provider::{ClaimsProvider, ClientRegistry, GrantStore};
use super::token_issuer::TokenIssuer;
use super::types::{Client, GrantType, IDENTITY_SCOPES, RefreshToken, TokenResponse, parse_scope};
use super::url_encoding::{decode_form_value, parse_pairs};

/// Form parameters of a token request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

impl TokenRequest {
    /// Parse an `application/x-www-form-urlencoded` body.
    pub fn from_form(body: &str) -> Result<Self, IdpError> {
        let mut request = Self::default();
        let mut seen = HashSet::new();
        let pairs = parse_pairs(body)
            .map_err(|_| IdpError::InvalidRequest("form body is not valid UTF-8".into()))?;
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "grant_type" => &mut request.grant_type,
                "code" => &mut request.code,
                "redirect_uri" => &mut request.redirect_uri,
                "client_id" => &mut request.client_id,
                "client_secret" => &mut request.client_secret,
                "code_verifier" => &mut request.code_verifier,
                "refresh_token" => &mut request.refresh_token,
                "scope" => &mut request.scope,
                _ => continue,
            };
            if !seen.insert(key.clone()) {
                return Err(IdpError::InvalidRequest(format!("parameter `{}` repeated", key)));
            }
            if !value.is_empty() {
                *slot = Some(value);
            }
        }
        Ok(request)
    }

    /// Apply HTTP Basic client credentials from an `Authorization` header.
    pub fn with_basic_auth(mut self, authorization: &str) -> Result<Self, IdpError> {
        let (scheme, credentials) = authorization
            .trim()
            .split_once(' ')
            .ok_or(ClientError::MissingCredentials)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(ClientError::MissingCredentials.into());
        }
        let decoded = STANDARD
            .decode(credentials.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or(ClientError::MissingCredentials)?;
        let (id, secret) = decoded.split_once(':').ok_or(ClientError::MissingCredentials)?;
        let undecodable = |_: Utf8Error| {
            IdpError::InvalidRequest("client credentials are not valid UTF-8".into())
        };
        let id = decode_form_value(id).map_err(undecodable)?;
        let secret = decode_form_value(secret).map_err(undecodable)?;

        if self.client_secret.is_some() {
            let message = "more than one client authentication method";
            return Err(IdpError::InvalidRequest(message.into()));
        }
        if self.client_id.as_deref().is_some_and(|existing| existing != id) {
            let message = "client_id conflicts with Authorization header";
            return Err(IdpError::InvalidRequest(message.into()));
        }
        self.client_id = Some(id);
        self.client_secret = Some(secret);
        Ok(self)
    }
}

pub struct TokenEndpoint<C: ClientRegistry, G: GrantStore, P: ClaimsProvider> {
    clients: Arc<C>,
    grants: Arc<G>,
    claims: Arc<P>,
    issuer: Arc<TokenIssuer>,
    clock: Arc<dyn Clock>,
    config: Arc<IdpConfig>,
}

impl<C: ClientRegistry, G: GrantStore, P: ClaimsProvider> TokenEndpoint<C, G, P> {
    pub fn new(
        clients: Arc<C>,
        grants: Arc<G>,
        claims: Arc<P>,
        issuer: Arc<TokenIssuer>,
        clock: Arc<dyn Clock>,
        config: Arc<IdpConfig>,
    ) -> Self {
        Self { clients, grants, claims, issuer, clock, config }
    }

    /// Handle a request, converting failures to the wire error response.
    pub async fn handle(&self, request: &TokenRequest) -> Result<TokenResponse, ErrorResponse> {
        self.exchange(request).await.map_err(|err| err.into_response())
    }

    #[instrument(skip(self, request), level = "debug", fields(grant_type = ?request.grant_type))]
    pub async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse, IdpError> {
        let grant_type: GrantType = request
            .grant_type
            .as_deref()
            .ok_or_else(|| IdpError::InvalidRequest("missing grant_type".into()))?
            .parse()
            .map_err(IdpError::UnsupportedGrantType)?;
        let client = self.authenticate(request).await?;
        if !client.allows_grant(grant_type) {
            return Err(ClientError::GrantTypeNotAllowed.into());
        }

        let response = match grant_type {
            GrantType::AuthorizationCode => self.authorization_code(&client, request).await?,
            GrantType::RefreshToken => self.refresh_token(&client, request).await?,
            GrantType::ClientCredentials => self.client_credentials(&client, request).await?,
        };
        info!(client_id = %client.id, grant_type = grant_type.as_str(), "tokens issued");
        Ok(response)
    }

    async fn authenticate(&self, request: &TokenRequest) -> Result<Client, IdpError> {
        let client_id = request.client_id.as_deref().ok_or(ClientError::MissingCredentials)?;
        let client = self.clients.lookup(client_id).await?;
        match (client.is_confidential(), request.client_secret.as_deref()) {
            (true, Some(secret)) if client.verify_secret(secret) => Ok(client),
            (true, Some(_)) => Err(ClientError::BadSecret.into()),
            (true, None) => Err(ClientError::MissingCredentials.into()),
            (false, None) => Ok(client),
            (false, Some(_)) => Err(ClientError::BadSecret.into()),
        }
    }

    async fn authorization_code(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> Result<TokenResponse, IdpError> {
        let code = request
            .code
            .as_deref()
            .ok_or_else(|| IdpError::InvalidRequest("missing code".into()))?;
        let grant = match self.grants.consume_code(code).await {
            Ok(grant) => grant,
            Err(GrantError::AlreadyConsumed) => {
                self.revoke_replayed(code, &client.id).await?;
                return Err(GrantError::AlreadyConsumed.into());
            }
            Err(err) => return Err(err.into()),
        };

        if grant.client_id != client.id {
            return Err(GrantError::ClientMismatch.into());
        }
        let redirect_matches = match request.redirect_uri.as_deref() {
            Some(uri) => uri == grant.redirect_uri,
            None => client.redirect_uris.len() == 1 && client.allows_redirect(&grant.redirect_uri),
        };
        if !redirect_matches {
            return Err(GrantError::RedirectMismatch.into());
        }
        let verifier = request.code_verifier.as_deref();
        let pkce_ok = match (&grant.code_challenge, grant.code_challenge_method, verifier) {
            (Some(challenge), Some(method), Some(verifier)) => {
                verify_pkce(method, challenge, verifier)
            }
            (None, _, None) => true,
            _ => false,
        };
        if !pkce_ok {
            return Err(GrantError::PkceMismatch.into());
        }

        let mut response = self
            .sign_tokens(client, &grant.subject, &grant.scopes, grant.nonce.as_deref())
            .await?;
        if client.allows_grant(GrantType::RefreshToken) {
            let token = RefreshToken::new(
                &client.id,
                &grant.subject,
                grant.scopes.clone(),
                self.clock.now(),
                self.config.refresh_token_lifetime(),
            );
            let token = self.grants.issue_refresh_token(token).await?;
            self.grants.bind_chain_to_code(code, &token.chain_id).await?;
            response.refresh_token = Some(token.token);
        }
        Ok(response)
    }

    /// A redeemed code came back: whatever was issued from it is suspect.
    async fn revoke_replayed(&self, code: &str, client_id: &str) -> Result<(), IdpError> {
        match self.grants.chain_for_code(code).await {
            Some(chain_id) => {
                let dropped = self.grants.revoke_chain(&chain_id).await?;
                warn!(
                    client_id,
                    chain_id = %chain_id,
                    dropped,
                    "authorization code replayed; refresh chain revoked"
                );
            }
            None => warn!(client_id, "authorization code replayed"),
        }
        Ok(())
    }

    async fn refresh_token(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> Result<TokenResponse, IdpError> {
        let presented = request
            .refresh_token
            .as_deref()
            .ok_or_else(|| IdpError::InvalidRequest("missing refresh_token".into()))?;
        let requested = request.scope.as_deref().map(parse_scope).filter(|s| !s.is_empty());
        let next = self
            .grants
            .rotate_refresh_token(presented, &client.id, requested.as_deref())
            .await?;
        let scopes = requested.unwrap_or_else(|| next.scopes.clone());
        let mut response = self.sign_tokens(client, &next.subject, &scopes, None).await?;
        response.refresh_token = Some(next.token);
        Ok(response)
    }

    async fn client_credentials(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> Result<TokenResponse, IdpError> {
        if !client.is_confidential() {
            return Err(ClientError::GrantTypeNotAllowed.into());
        }
        let scopes = match request.scope.as_deref().map(parse_scope).filter(|s| !s.is_empty()) {
            Some(requested) => {
                if requested.iter().any(|s| IDENTITY_SCOPES.contains(&s.as_str())) {
                    return Err(IdpError::InvalidScope("identity scopes need a user".into()));
                }
                if !client.allows_scopes(&requested) {
                    return Err(ClientError::ScopeNotAllowed.into());
                }
                requested
            }
            None => {
                let mut all: Vec<String> = client
                    .scopes
                    .iter()
                    .filter(|s| !IDENTITY_SCOPES.contains(&s.as_str()))
                    .cloned()
                    .collect();
                all.sort();
                all
            }
        };
        self.sign_tokens(client, &client.id, &scopes, None).await
    }

    /// Access token, plus an ID token when `openid` was granted.
    async fn sign_tokens(
        &self,
        client: &Client,
        subject: &str,
        scopes: &[String],
        nonce: Option<&str>,
    ) -> Result<TokenResponse, IdpError> {
        let access = self
            .issuer
            .issue_access_token(subject, &client.id, scopes, self.config.access_token_lifetime())
            .await?;
        let id_token = if scopes.iter().any(|s| s == "openid") {
            let claims = self.claims.resolve_claims(subject, scopes).await?;
            let lifetime = self.config.id_token_lifetime();
            let token = self
                .issuer
                .issue_id_token(subject, &client.id, &claims, nonce, lifetime)
                .await?;
            Some(token.token)
        } else {
            None
        };
        Ok(TokenResponse {
            expires_in: access.lifetime_secs(),
            access_token: access.token,
            token_type: "Bearer".to_string(),
            refresh_token: None,
            id_token,
            scope: (!scopes.is_empty()).then(|| scopes.join(" ")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_form_and_basic_credentials() {
        let form = "grant_type=authorization_code&code=abc&code_verifier=v";
        let request = TokenRequest::from_form(form)
            .unwrap()
            // "my app:p@ss" with the id form-encoded first
            .with_basic_auth(&format!("Basic {}", STANDARD.encode("my+app:p%40ss")))
            .unwrap();
        assert_eq!(request.grant_type.as_deref(), Some("authorization_code"));
        assert_eq!(request.client_id.as_deref(), Some("my app"));
        assert_eq!(request.client_secret.as_deref(), Some("p@ss"));
    }

    #[test]
    fn matching_client_id_is_accepted() {
        let request = TokenRequest::from_form("client_id=app1")
            .unwrap()
            .with_basic_auth(&format!("basic {}", STANDARD.encode("app1:s")))
            .unwrap();
        assert_eq!(request.client_secret.as_deref(), Some("s"));
    }

    #[test]
    fn malformed_basic_header() {
        let request = TokenRequest::default();
        assert!(request.clone().with_basic_auth("Basic !!!").is_err());
        let no_colon = format!("Basic {}", STANDARD.encode("no-colon"));
        assert!(request.with_basic_auth(&no_colon).is_err());
    }
}

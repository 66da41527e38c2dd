//! Authorization endpoint: validates a request, records the grant and
//! describes the redirect back to the client.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument};

use super::clock::Clock;
use super::config::IdpConfig;
use super::crypto::is_valid_pkce_value;
use super::error::{ClientError, ErrorResponse, IdpError};
use super::provider::{ClientRegistry, GrantStore};
use super::types::{AuthorizationGrant, Client, CodeChallengeMethod, GrantType, parse_scope};
use super::url_encoding::{append_query, parse_pairs};

/// Query parameters of an authorization request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
}

impl AuthorizationRequest {
    /// Parse a raw query string. Repeated parameters are rejected; unknown ones ignored.
    pub fn from_query(query: &str) -> Result<Self, IdpError> {
        let mut request = Self::default();
        let mut seen = HashSet::new();
        let pairs = parse_pairs(query.trim_start_matches('?'))
            .map_err(|_| IdpError::InvalidRequest("query is not valid UTF-8".into()))?;
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "client_id" => &mut request.client_id,
                "redirect_uri" => &mut request.redirect_uri,
                "response_type" => &mut request.response_type,
                "scope" => &mut request.scope,
                "state" => &mut request.state,
                "code_challenge" => &mut request.code_challenge,
                "code_challenge_method" => &mut request.code_challenge_method,
                "nonce" => &mut request.nonce,
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
}

/// Where to send the user agent and which parameters to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectDescriptor {
    pub redirect_uri: String,
    pub params: Vec<(String, String)>,
}

impl RedirectDescriptor {
    fn new(redirect_uri: String) -> Self {
        Self { redirect_uri, params: Vec::new() }
    }

    fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.push((key.to_string(), value.into()));
        self
    }

    fn state(self, state: Option<&str>) -> Self {
        match state {
            Some(state) => self.param("state", state),
            None => self,
        }
    }

    /// Value for the `Location` header.
    pub fn location(&self) -> String {
        append_query(&self.redirect_uri, &self.params)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// True when the redirect carries an `error` rather than a `code`.
    pub fn is_error(&self) -> bool {
        self.get("error").is_some()
    }
}

/// Result of an authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    /// Redirect to the validated redirect URI, carrying a code or an error.
    Redirect(RedirectDescriptor),
    /// The client or redirect URI could not be trusted; shown to the user directly.
    Error(ErrorResponse),
}

impl AuthorizationOutcome {
    pub fn redirect(&self) -> Option<&RedirectDescriptor> {
        match self {
            AuthorizationOutcome::Redirect(redirect) => Some(redirect),
            AuthorizationOutcome::Error(_) => None,
        }
    }

    /// The issued code, if the request succeeded.
    pub fn code(&self) -> Option<&str> {
        self.redirect().filter(|r| !r.is_error()).and_then(|r| r.get("code"))
    }
}

pub struct AuthorizationEndpoint<C: ClientRegistry, G: GrantStore> {
    clients: Arc<C>,
    grants: Arc<G>,
    clock: Arc<dyn Clock>,
    config: Arc<IdpConfig>,
}

impl<C: ClientRegistry, G: GrantStore> AuthorizationEndpoint<C, G> {
    pub fn new(
        clients: Arc<C>,
        grants: Arc<G>,
        clock: Arc<dyn Clock>,
        config: Arc<IdpConfig>,
    ) -> Self {
        Self { clients, grants, clock, config }
    }

    /// Handle a request on behalf of the authenticated `subject`.
    ///
    /// The client and redirect URI are validated first; until both hold, every
    /// failure is returned directly and nothing is redirected.
    #[instrument(skip(self, request), level = "debug", fields(client_id = ?request.client_id))]
    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
        subject: &str,
    ) -> AuthorizationOutcome {
        let (client, redirect_uri) = match self.trusted_redirect(request).await {
            Ok(trusted) => trusted,
            Err(err) => return AuthorizationOutcome::Error(err.into_response()),
        };
        let state = request.state.as_deref();
        let descriptor = RedirectDescriptor::new(redirect_uri.clone());
        match self.issue_code(&client, redirect_uri, request, subject).await {
            Ok(code) => AuthorizationOutcome::Redirect(descriptor.param("code", code).state(state)),
            Err(err) => {
                let response = err.into_response();
                AuthorizationOutcome::Redirect(
                    descriptor
                        .param("error", response.body.error)
                        .param("error_description", response.body.error_description)
                        .state(state),
                )
            }
        }
    }

    async fn trusted_redirect(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<(Client, String), IdpError> {
        let client_id = request
            .client_id
            .as_deref()
            .ok_or_else(|| IdpError::InvalidRequest("missing client_id".into()))?;
        let client = self
            .clients
            .lookup(client_id)
            .await
            .map_err(|_| IdpError::InvalidRequest(format!("unknown client `{}`", client_id)))?;
        let redirect_uri = match request.redirect_uri.as_deref() {
            Some(uri) if client.allows_redirect(uri) => uri.to_string(),
            Some(_) => return Err(ClientError::RedirectNotAllowed.into()),
            None if client.redirect_uris.len() == 1 => {
                client.redirect_uris.iter().next().cloned().unwrap_or_default()
            }
            None => return Err(IdpError::InvalidRequest("missing redirect_uri".into())),
        };
        Ok((client, redirect_uri))
    }

    async fn issue_code(
        &self,
        client: &Client,
        redirect_uri: String,
        request: &AuthorizationRequest,
        subject: &str,
    ) -> Result<String, IdpError> {
        match request.response_type.as_deref() {
            Some("code") => {}
            Some(other) => return Err(IdpError::UnsupportedResponseType(other.to_string())),
            None => return Err(IdpError::InvalidRequest("missing response_type".into())),
        }
        if !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(ClientError::GrantTypeNotAllowed.into());
        }
        if subject.trim().is_empty() {
            return Err(IdpError::InvalidRequest("no authenticated subject".into()));
        }

        let scopes = parse_scope(request.scope.as_deref().unwrap_or_default());
        if scopes.is_empty() {
            return Err(IdpError::InvalidScope("no scope requested".into()));
        }
        if !client.allows_scopes(&scopes) {
            return Err(ClientError::ScopeNotAllowed.into());
        }

        let mut grant = AuthorizationGrant::new(
            &client.id,
            redirect_uri,
            subject,
            scopes,
            self.clock.now(),
            self.config.authorization_code_lifetime(),
        )
        .with_nonce(request.nonce.clone());
        if let Some((challenge, method)) = self.pkce_challenge(client, request)? {
            grant = grant.with_pkce(challenge, method);
        }

        let pkce = grant.code_challenge_method.map(|m| m.as_str());
        let code = self.grants.issue_code(grant).await?;
        info!(client_id = %client.id, pkce, "authorization code issued");
        Ok(code)
    }

    fn pkce_challenge(
        &self,
        client: &Client,
        request: &AuthorizationRequest,
    ) -> Result<Option<(String, CodeChallengeMethod)>, IdpError> {
        let challenge = match request.code_challenge.as_deref() {
            Some(challenge) => challenge,
            None if request.code_challenge_method.is_some() => {
                return Err(IdpError::InvalidRequest(
                    "code_challenge_method without code_challenge".into(),
                ));
            }
            None if self.config.require_pkce || client.require_pkce => {
                return Err(IdpError::InvalidRequest("code_challenge required".into()));
            }
            None => return Ok(None),
        };
        // RFC 7636 defaults to plain when the method is omitted.
        let method: CodeChallengeMethod = request
            .code_challenge_method
            .as_deref()
            .unwrap_or("plain")
            .parse()
            .map_err(|m| {
                IdpError::InvalidRequest(format!("unsupported code_challenge_method `{}`", m))
            })?;
        if method == CodeChallengeMethod::Plain && !self.config.allow_plain_pkce {
            return Err(IdpError::InvalidRequest("plain code_challenge_method not allowed".into()));
        }
        if !is_valid_pkce_value(challenge) {
            return Err(IdpError::InvalidRequest("malformed code_challenge".into()));
        }
        Ok(Some((challenge.to_string(), method)))
    }
}

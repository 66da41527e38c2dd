//! Error taxonomy for the identity core and its mapping to OAuth wire errors.
//!
//! Internal variants are detailed so they can be logged; the wire mapping
//! collapses them to a fixed code and description so a caller can never tell
//! which check failed (expired vs unknown code, bad secret vs unknown client).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

/// Client authentication and authorization failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("unknown client")]
    UnknownClient,
    #[error("client secret mismatch")]
    BadSecret,
    #[error("client credentials missing")]
    MissingCredentials,
    #[error("redirect uri not registered for client")]
    RedirectNotAllowed,
    #[error("requested scope not allowed for client")]
    ScopeNotAllowed,
    #[error("grant type not allowed for client")]
    GrantTypeNotAllowed,
}

/// Failures redeeming an authorization code or refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrantError {
    #[error("grant expired")]
    Expired,
    #[error("grant not found")]
    NotFound,
    #[error("grant already consumed")]
    AlreadyConsumed,
    #[error("grant revoked")]
    Revoked,
    #[error("grant issued to a different client")]
    ClientMismatch,
    #[error("redirect uri differs from the authorization request")]
    RedirectMismatch,
    #[error("pkce verification failed")]
    PkceMismatch,
    #[error("subject unknown to the claims provider")]
    UnknownSubject,
}

/// Signing key faults. These indicate a misconfigured deployment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("no active signing key")]
    NoActiveKey,
    #[error("verification key `{0}` not found")]
    UnknownKey(String),
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("random source failure")]
    Random,
}

/// Reasons a presented token fails verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token has no key id")]
    MissingKeyId,
    #[error("signing key `{0}` is unknown or retired")]
    UnknownKey(String),
    #[error("signature does not verify")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("audience mismatch")]
    AudienceMismatch,
    #[error("issuer mismatch")]
    IssuerMismatch,
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Umbrella error returned by the endpoint logic.
#[derive(Debug, Error)]
pub enum IdpError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Grant(#[from] GrantError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid scope: {0}")]
    InvalidScope(String),
    #[error("unsupported grant type `{0}`")]
    UnsupportedGrantType(String),
    #[error("unsupported response type `{0}`")]
    UnsupportedResponseType(String),
    #[error("grant store failure: {0}")]
    Store(String),
}

/// Fixed OAuth 2.0 error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    InvalidScope,
    UnauthorizedClient,
    UnsupportedGrantType,
    UnsupportedResponseType,
    ServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::InvalidClient => "invalid_client",
            ErrorCode::InvalidGrant => "invalid_grant",
            ErrorCode::InvalidScope => "invalid_scope",
            ErrorCode::UnauthorizedClient => "unauthorized_client",
            ErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            ErrorCode::UnsupportedResponseType => "unsupported_response_type",
            ErrorCode::ServerError => "server_error",
        }
    }

    /// The one description ever sent for this code.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => {
                "The request is missing a parameter or is otherwise malformed"
            }
            ErrorCode::InvalidClient => "Client authentication failed",
            ErrorCode::InvalidGrant => "The provided grant is invalid, expired or revoked",
            ErrorCode::InvalidScope => "The requested scope is invalid or exceeds what is allowed",
            ErrorCode::UnauthorizedClient => "The client is not authorized to use this grant type",
            ErrorCode::UnsupportedGrantType => "The grant type is not supported",
            ErrorCode::UnsupportedResponseType => "The response type is not supported",
            ErrorCode::ServerError => "The server encountered an internal error",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::InvalidClient => 401,
            ErrorCode::ServerError => 500,
            _ => 400,
        }
    }
}

/// JSON body of an OAuth error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub error_description: String,
}

/// Framework-agnostic error response: status code plus JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: u16,
    pub body: ErrorBody,
}

impl ErrorResponse {
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            status: code.status(),
            body: ErrorBody {
                error: code.as_str().to_string(),
                error_description: code.description().to_string(),
            },
        }
    }

    /// Serialized body bytes, ready to be written with `application/json`.
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(&self.body).unwrap_or_default()
    }
}

impl IdpError {
    /// Wire error code. Internal detail is deliberately dropped here.
    pub fn code(&self) -> ErrorCode {
        match self {
            IdpError::Client(ClientError::ScopeNotAllowed) => ErrorCode::InvalidScope,
            IdpError::Client(ClientError::GrantTypeNotAllowed) => ErrorCode::UnauthorizedClient,
            IdpError::Client(ClientError::RedirectNotAllowed) => ErrorCode::InvalidRequest,
            IdpError::Client(_) => ErrorCode::InvalidClient,
            IdpError::Grant(_) => ErrorCode::InvalidGrant,
            IdpError::Key(_) | IdpError::Config(_) | IdpError::Store(_) => ErrorCode::ServerError,
            IdpError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            IdpError::InvalidScope(_) => ErrorCode::InvalidScope,
            IdpError::UnsupportedGrantType(_) => ErrorCode::UnsupportedGrantType,
            IdpError::UnsupportedResponseType(_) => ErrorCode::UnsupportedResponseType,
        }
    }

    pub fn status(&self) -> u16 {
        self.code().status()
    }

    /// True for faults of the deployment rather than the caller.
    pub fn is_server_fault(&self) -> bool {
        matches!(self, IdpError::Key(_) | IdpError::Config(_) | IdpError::Store(_))
    }

    /// Convert into a wire response, logging the internal variant.
    pub fn into_response(&self) -> ErrorResponse {
        let code = self.code();
        if self.is_server_fault() {
            error!(error = %self, error_code = code.as_str(), "identity core fault");
        } else {
            warn!(error = %self, error_code = code.as_str(), "request rejected");
        }
        ErrorResponse::from_code(code)
    }
}

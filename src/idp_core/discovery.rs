//! OpenID Connect discovery document (`/.well-known/openid-configuration`).

use serde::{Deserialize, Serialize};

use super::config::IdpConfig;
use super::types::{GrantType, IDENTITY_SCOPES, identity_scope_claims};

pub const AUTHORIZATION_PATH: &str = "/connect/authorize";
pub const TOKEN_PATH: &str = "/connect/token";
pub const JWKS_PATH: &str = "/.well-known/openid-configuration/jwks";

/// Result of serving /.well-known/openid-configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub response_modes_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

impl DiscoveryDocument {
    /// Build the document for `config`; `algorithms` lists the `alg` of every
    /// key currently published in the JWKS.
    pub fn new(config: &IdpConfig, algorithms: &[&str]) -> Self {
        let base = config.issuer.trim_end_matches('/');
        let mut scopes: Vec<String> = IDENTITY_SCOPES.iter().map(|s| s.to_string()).collect();
        for client in &config.clients {
            for scope in &client.scopes {
                if !scopes.contains(scope) {
                    scopes.push(scope.clone());
                }
            }
        }
        let mut claims = vec!["sub".to_string()];
        claims.extend(
            IDENTITY_SCOPES
                .iter()
                .flat_map(|s| identity_scope_claims(s).iter())
                .map(|c| c.to_string()),
        );
        let mut signing_algs: Vec<String> = vec![config.signing_algorithm.as_str().to_string()];
        for alg in algorithms {
            if !signing_algs.iter().any(|a| a == alg) {
                signing_algs.push(alg.to_string());
            }
        }
        let mut challenge_methods = vec!["S256".to_string()];
        if config.allow_plain_pkce {
            challenge_methods.push("plain".to_string());
        }
        Self {
            issuer: config.issuer.clone(),
            authorization_endpoint: format!("{}{}", base, AUTHORIZATION_PATH),
            token_endpoint: format!("{}{}", base, TOKEN_PATH),
            jwks_uri: format!("{}{}", base, JWKS_PATH),
            scopes_supported: scopes,
            claims_supported: claims,
            response_types_supported: vec!["code".to_string()],
            response_modes_supported: vec!["query".to_string()],
            grant_types_supported: [
                GrantType::AuthorizationCode,
                GrantType::RefreshToken,
                GrantType::ClientCredentials,
            ]
            .iter()
            .map(|g| g.as_str().to_string())
            .collect(),
            subject_types_supported: vec!["public".to_string()],
            id_token_signing_alg_values_supported: signing_algs,
            code_challenge_methods_supported: challenge_methods,
            token_endpoint_auth_methods_supported: vec![
                "client_secret_basic".to_string(),
                "client_secret_post".to_string(),
                "none".to_string(),
            ],
        }
    }

    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

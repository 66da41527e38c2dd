//! Authorization server core for Starberry: client registry, grant store,
//! signing keys, token issuance and the authorization/token endpoint logic.
//!
//! HTTP routing, TLS and user login live outside this crate. The embedding
//! application parses nothing itself: it hands raw query strings and form
//! bodies to [`IdentityServer`] and writes back what it returns.

pub mod idp_core;

pub use idp_core::authorize::{
    AuthorizationEndpoint, AuthorizationOutcome, AuthorizationRequest, RedirectDescriptor,
};
pub use idp_core::clock::{Clock, ManualClock, SystemClock};
pub use idp_core::config::{ClientConfig, IdpConfig, IdpConfigBuilder};
pub use idp_core::discovery::DiscoveryDocument;
pub use idp_core::error::{
    ClientError, ConfigError, ErrorBody, ErrorCode, ErrorResponse, GrantError, IdpError, KeyError,
    TokenError,
};
pub use idp_core::jwks::{Jwk, JwkSet};
pub use idp_core::key_material::{KeyMaterial, KeyResolver, SigningAlgorithm, SigningKey};
pub use idp_core::memory::{
    InMemoryClaimsProvider, InMemoryClientRegistry, InMemoryGrantStore, UserProfile,
};
pub use idp_core::provider::{ClaimsProvider, ClientRegistry, GrantStore};
pub use idp_core::server::IdentityServer;
pub use idp_core::token_endpoint::{TokenEndpoint, TokenRequest};
pub use idp_core::token_issuer::{
    AccessTokenClaims, ExpiringClaims, IdTokenClaims, IssuedToken, TokenIssuer, TokenVerifier,
};
pub use idp_core::types::{
    AuthorizationGrant, Claims, Client, CodeChallengeMethod, GrantType, RefreshToken, TokenResponse,
};

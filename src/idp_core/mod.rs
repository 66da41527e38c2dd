//! Identity provider core primitives and endpoint logic.

pub mod authorize;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod jwks;
pub mod key_material;
pub mod memory;
pub mod provider;
pub mod server;
pub mod token_endpoint;
pub mod token_issuer;
pub mod types;
pub mod url_encoding;

//! JSON Web Key Set document published for external verifiers.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};

use super::error::KeyError;
use super::key_material::{KeyResolver, SigningAlgorithm};

/// A public JWK (OKP/Ed25519 or EC/P-256).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub kid: String,
    pub alg: String,
    pub crv: String,
    pub x: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// Build a verification key from the published components.
    pub fn decoding_key(&self) -> Result<(DecodingKey, Algorithm), KeyError> {
        let algorithm = SigningAlgorithm::from_name(&self.alg).ok_or_else(|| {
            KeyError::InvalidKeyMaterial(format!("unsupported alg `{}`", self.alg))
        })?;
        let key = match (algorithm, self.kty.as_str(), self.crv.as_str()) {
            (SigningAlgorithm::EdDSA, "OKP", "Ed25519") => DecodingKey::from_ed_components(&self.x),
            (SigningAlgorithm::ES256, "EC", "P-256") => {
                let y = self
                    .y
                    .as_deref()
                    .ok_or_else(|| KeyError::InvalidKeyMaterial("missing y".into()))?;
                DecodingKey::from_ec_components(&self.x, y)
            }
            _ => {
                let message = format!("unexpected key type `{}`/`{}`", self.kty, self.crv);
                return Err(KeyError::InvalidKeyMaterial(message));
            }
        }
        .map_err(|e| KeyError::InvalidKeyMaterial(e.to_string()))?;
        Ok((key, algorithm.jwt_algorithm()))
    }
}

/// A JWKS response containing multiple keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[async_trait]
impl KeyResolver for JwkSet {
    async fn resolve(&self, kid: &str) -> Result<(DecodingKey, Algorithm), KeyError> {
        self.find(kid)
            .ok_or_else(|| KeyError::UnknownKey(kid.to_string()))?
            .decoding_key()
    }
}

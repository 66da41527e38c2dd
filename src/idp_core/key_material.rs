//! Signing keys: the active key, retiring keys kept for a grace window, and
//! key-id based resolution for verification.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::clock::{Clock, saturating_expiry};
use super::error::KeyError;
use super::jwks::{Jwk, JwkSet};

/// Asymmetric JWS algorithms the issuer can sign with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// Ed25519.
    #[default]
    EdDSA,
    /// ECDSA over P-256 with SHA-256.
    ES256,
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::EdDSA => "EdDSA",
            SigningAlgorithm::ES256 => "ES256",
        }
    }

    pub fn jwt_algorithm(&self) -> Algorithm {
        match self {
            SigningAlgorithm::EdDSA => Algorithm::EdDSA,
            SigningAlgorithm::ES256 => Algorithm::ES256,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "EdDSA" => Some(SigningAlgorithm::EdDSA),
            "ES256" => Some(SigningAlgorithm::ES256),
            _ => None,
        }
    }
}

/// A signing key pair. Private material never leaves this crate.
pub struct SigningKey {
    kid: String,
    algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    public_key: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl SigningKey {
    /// Generates a fresh key pair with a random key id.
    pub fn generate(algorithm: SigningAlgorithm, now: DateTime<Utc>) -> Result<Self, KeyError> {
        Self::generate_with_id(uuid::Uuid::new_v4().simple().to_string(), algorithm, now)
    }

    /// Generates a fresh key pair with the given key id.
    pub fn generate_with_id(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        now: DateTime<Utc>,
    ) -> Result<Self, KeyError> {
        let rng = SystemRandom::new();
        let pkcs8 = match algorithm {
            SigningAlgorithm::EdDSA => Ed25519KeyPair::generate_pkcs8(&rng),
            SigningAlgorithm::ES256 => {
                EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            }
        }
        .map_err(|_| KeyError::Random)?;
        Self::from_pkcs8(kid, algorithm, pkcs8.as_ref(), now)
    }

    /// Loads a key pair from PKCS#8 DER.
    pub fn from_pkcs8(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        pkcs8_der: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Self, KeyError> {
        let kid = kid.into();
        if kid.is_empty() {
            return Err(KeyError::InvalidKeyMaterial("empty key id".into()));
        }
        let (public_key, encoding_key) = match algorithm {
            SigningAlgorithm::EdDSA => {
                let pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(pkcs8_der)
                    .map_err(|e| KeyError::InvalidKeyMaterial(e.to_string()))?;
                (pair.public_key().as_ref().to_vec(), EncodingKey::from_ed_der(pkcs8_der))
            }
            SigningAlgorithm::ES256 => {
                let rng = SystemRandom::new();
                let pair =
                    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8_der, &rng)
                        .map_err(|e| KeyError::InvalidKeyMaterial(e.to_string()))?;
                (pair.public_key().as_ref().to_vec(), EncodingKey::from_ec_der(pkcs8_der))
            }
        };
        Ok(Self { kid, algorithm, encoding_key, public_key, created_at: now })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Raw public key: 32 bytes for Ed25519, an uncompressed SEC1 point for P-256.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub fn decoding_key(&self) -> DecodingKey {
        match self.algorithm {
            SigningAlgorithm::EdDSA => DecodingKey::from_ed_der(&self.public_key),
            SigningAlgorithm::ES256 => DecodingKey::from_ec_der(&self.public_key),
        }
    }

    /// Public JWK for discovery.
    pub fn to_jwk(&self) -> Jwk {
        match self.algorithm {
            SigningAlgorithm::EdDSA => Jwk {
                kty: "OKP".into(),
                use_: "sig".into(),
                kid: self.kid.clone(),
                alg: self.algorithm.as_str().into(),
                crv: "Ed25519".into(),
                x: URL_SAFE_NO_PAD.encode(&self.public_key),
                y: None,
            },
            SigningAlgorithm::ES256 => {
                // 0x04 || x || y
                let point = self.public_key.get(1..).unwrap_or_default();
                let (x, y) = point.split_at(point.len() / 2);
                Jwk {
                    kty: "EC".into(),
                    use_: "sig".into(),
                    kid: self.kid.clone(),
                    alg: self.algorithm.as_str().into(),
                    crv: "P-256".into(),
                    x: URL_SAFE_NO_PAD.encode(x),
                    y: Some(URL_SAFE_NO_PAD.encode(y)),
                }
            }
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Resolves a verification key by the `kid` carried in a token header.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, kid: &str) -> Result<(DecodingKey, Algorithm), KeyError>;
}

struct RetiringKey {
    key: Arc<SigningKey>,
    verify_until: DateTime<Utc>,
}

#[derive(Default)]
struct KeyRing {
    active: Option<Arc<SigningKey>>,
    retiring: Vec<RetiringKey>,
}

/// Holds the active signing key and the keys rotated out within the grace window.
pub struct KeyMaterial {
    ring: RwLock<KeyRing>,
    grace: Duration,
    clock: Arc<dyn Clock>,
}

impl KeyMaterial {
    /// Empty key material; signing fails with [`KeyError::NoActiveKey`] until a key is rotated in.
    pub fn new(grace: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { ring: RwLock::new(KeyRing::default()), grace, clock }
    }

    pub fn with_active(key: SigningKey, grace: Duration, clock: Arc<dyn Clock>) -> Self {
        let ring = KeyRing { active: Some(Arc::new(key)), retiring: Vec::new() };
        Self { ring: RwLock::new(ring), grace, clock }
    }

    /// Key material seeded with a freshly generated, non-persisted key.
    pub fn generate(
        algorithm: SigningAlgorithm,
        grace: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, KeyError> {
        let key = SigningKey::generate(algorithm, clock.now())?;
        info!(kid = key.kid(), alg = algorithm.as_str(), "generated ephemeral signing key");
        Ok(Self::with_active(key, grace, clock))
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub async fn active_key(&self) -> Result<Arc<SigningKey>, KeyError> {
        self.ring.read().await.active.clone().ok_or(KeyError::NoActiveKey)
    }

    /// Looks up the active key or a retiring key still inside its grace window.
    pub async fn key_by_id(&self, kid: &str) -> Result<Arc<SigningKey>, KeyError> {
        let now = self.clock.now();
        let ring = self.ring.read().await;
        if let Some(active) = ring.active.as_ref().filter(|k| k.kid() == kid) {
            return Ok(active.clone());
        }
        ring.retiring
            .iter()
            .find(|r| r.key.kid() == kid && now < r.verify_until)
            .map(|r| r.key.clone())
            .ok_or_else(|| KeyError::UnknownKey(kid.to_string()))
    }

    /// Atomically installs `new_key` as the active key. The previous active key
    /// keeps verifying until the grace window elapses.
    pub async fn rotate(&self, new_key: SigningKey) -> Result<(), KeyError> {
        let now = self.clock.now();
        let mut ring = self.ring.write().await;
        let duplicate = ring.active.iter().any(|k| k.kid() == new_key.kid())
            || ring.retiring.iter().any(|r| r.key.kid() == new_key.kid());
        if duplicate {
            let message = format!("key id `{}` already in use", new_key.kid());
            return Err(KeyError::InvalidKeyMaterial(message));
        }
        ring.retiring.retain(|r| now < r.verify_until);
        let new_kid = new_key.kid().to_string();
        if let Some(previous) = ring.active.replace(Arc::new(new_key)) {
            info!(retired = previous.kid(), active = %new_kid, "rotated signing key");
            let verify_until = saturating_expiry(now, self.grace);
            ring.retiring.push(RetiringKey { key: previous, verify_until });
        } else {
            info!(active = %new_kid, "installed signing key");
        }
        Ok(())
    }

    /// Generates a key and rotates it in. Returns the new key id.
    pub async fn rotate_generated(&self, algorithm: SigningAlgorithm) -> Result<String, KeyError> {
        let key = SigningKey::generate(algorithm, self.clock.now())?;
        let kid = key.kid().to_string();
        self.rotate(key).await?;
        Ok(kid)
    }

    /// Active key followed by retiring keys still inside the grace window.
    pub async fn verification_keys(&self) -> Vec<Arc<SigningKey>> {
        let now = self.clock.now();
        let ring = self.ring.read().await;
        ring.active
            .iter()
            .cloned()
            .chain(ring.retiring.iter().filter(|r| now < r.verify_until).map(|r| r.key.clone()))
            .collect()
    }

    /// Drops retiring keys whose grace window has elapsed.
    pub async fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut ring = self.ring.write().await;
        let before = ring.retiring.len();
        ring.retiring.retain(|r| now < r.verify_until);
        let pruned = before - ring.retiring.len();
        if pruned > 0 {
            debug!(pruned, "dropped retired signing keys");
        }
        pruned
    }

    /// Public key set for discovery.
    pub async fn jwks(&self) -> JwkSet {
        JwkSet { keys: self.verification_keys().await.iter().map(|k| k.to_jwk()).collect() }
    }
}

#[async_trait]
impl KeyResolver for KeyMaterial {
    async fn resolve(&self, kid: &str) -> Result<(DecodingKey, Algorithm), KeyError> {
        let key = self.key_by_id(kid).await?;
        Ok((key.decoding_key(), key.algorithm().jwt_algorithm()))
    }
}

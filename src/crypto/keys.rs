//! Signing key store.
//!
//! Key pairs are loaded once at startup from PEM files (PKCS#8 private,
//! X.509 SubjectPublicKeyInfo public) and are immutable afterwards. The
//! active key signs new tokens; every loaded key verifies, so tokens signed
//! by a retiring key stay valid until they expire.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::config::KeyConfig;
use crate::error::{AppError, Result};

/// Smallest accepted RSA modulus, in bits.
pub const MIN_RSA_BITS: usize = 2048;

/// One RS256 key pair.
pub struct SigningKey {
    key_id: String,
    algorithm: Algorithm,
    public_key: RsaPublicKey,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("bits", &(self.public_key.size() * 8))
            .field("encoding_key", &"<EncodingKey>")
            .finish()
    }
}

impl SigningKey {
    /// Builds a key pair from PEM text.
    pub fn from_pem(key_id: &str, private_pem: &str, public_pem: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem).map_err(|e| {
            AppError::ConfigInvalid(format!("key {}: invalid PKCS#8 private key: {}", key_id, e))
        })?;
        let public_key = RsaPublicKey::from_public_key_pem(public_pem).map_err(|e| {
            AppError::ConfigInvalid(format!("key {}: invalid X.509 public key: {}", key_id, e))
        })?;

        if private_key.to_public_key() != public_key {
            return Err(AppError::ConfigInvalid(format!(
                "key {}: public key does not match private key",
                key_id
            )));
        }

        let bits = public_key.size() * 8;
        if bits < MIN_RSA_BITS {
            return Err(AppError::ConfigInvalid(format!(
                "key {}: RSA key is {} bits, at least {} required",
                key_id, bits, MIN_RSA_BITS
            )));
        }

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).map_err(|e| {
            AppError::ConfigInvalid(format!("key {}: unusable private key: {}", key_id, e))
        })?;
        let (n, e) = encode_components(&public_key);
        let decoding_key = DecodingKey::from_rsa_components(&n, &e).map_err(|e| {
            AppError::ConfigInvalid(format!("key {}: unusable public key: {}", key_id, e))
        })?;

        Ok(Self {
            key_id: key_id.to_string(),
            algorithm: Algorithm::RS256,
            public_key,
            encoding_key,
            decoding_key,
        })
    }

    /// Reads and builds a key pair from the configured PEM files.
    pub fn from_files(config: &KeyConfig) -> Result<Self> {
        let private_pem = Zeroizing::new(read_pem(&config.key_id, &config.private_key_path)?);
        let public_pem = read_pem(&config.key_id, &config.public_key_path)?;
        Self::from_pem(&config.key_id, &private_pem, &public_pem)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// The public half as a JSON Web Key.
    pub fn jwk(&self) -> Jwk {
        let (n, e) = encode_components(&self.public_key);
        Jwk {
            kty: "RSA",
            key_use: "sig",
            alg: "RS256",
            kid: self.key_id.clone(),
            n,
            e,
        }
    }
}

fn read_pem(key_id: &str, path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        AppError::ConfigInvalid(format!(
            "key {}: cannot read {}: {}",
            key_id,
            path.display(),
            e
        ))
    })
}

fn encode_components(public_key: &RsaPublicKey) -> (String, String) {
    (
        URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
        URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
    )
}

/// A public verification key in JWK form.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: &'static str,
    #[serde(rename = "use")]
    pub key_use: &'static str,
    pub alg: &'static str,
    pub kid: String,
    pub n: String,
    pub e: String,
}

/// A JWK Set document.
#[derive(Debug, Clone, Serialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// The loaded keys plus the id of the one that signs.
///
/// Invariant: `active_key_id` is always present in `keys`.
#[derive(Debug)]
pub struct KeySet {
    active_key_id: String,
    keys: BTreeMap<String, SigningKey>,
}

impl KeySet {
    /// Loads every configured key pair. Any unreadable or malformed file, or
    /// an active key id missing from the set, is a fatal configuration error.
    pub fn load(configs: &[KeyConfig], active_key_id: &str) -> Result<Self> {
        let keys = configs
            .iter()
            .map(SigningKey::from_files)
            .collect::<Result<Vec<_>>>()?;
        let set = Self::from_keys(keys, active_key_id)?;
        tracing::info!(
            "✅ Loaded {} signing key(s), active key: {}",
            set.keys.len(),
            set.active_key_id
        );
        Ok(set)
    }

    /// Builds a key set from already-parsed keys.
    pub fn from_keys(keys: Vec<SigningKey>, active_key_id: &str) -> Result<Self> {
        let mut map = BTreeMap::new();
        for key in keys {
            if map.contains_key(&key.key_id) {
                return Err(AppError::ConfigInvalid(format!(
                    "duplicate key id: {}",
                    key.key_id
                )));
            }
            map.insert(key.key_id.clone(), key);
        }

        if !map.contains_key(active_key_id) {
            return Err(AppError::ConfigInvalid(format!(
                "Active RSA key not found: {}",
                active_key_id
            )));
        }

        Ok(Self {
            active_key_id: active_key_id.to_string(),
            keys: map,
        })
    }

    pub fn active_key_id(&self) -> &str {
        &self.active_key_id
    }

    /// The key that signs new tokens.
    pub fn active_key(&self) -> &SigningKey {
        // Checked by `from_keys`; the map is never mutated afterwards.
        &self.keys[&self.active_key_id]
    }

    /// Every key offered for verification, ordered by key id.
    pub fn all_keys(&self) -> Vec<&SigningKey> {
        self.keys.values().collect()
    }

    pub fn get(&self, key_id: &str) -> Option<&SigningKey> {
        self.keys.get(key_id)
    }

    pub fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: self.keys.values().map(SigningKey::jwk).collect(),
        }
    }
}

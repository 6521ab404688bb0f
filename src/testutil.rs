//! Shared fixtures for unit tests.

use once_cell::sync::Lazy;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

use crate::crypto::keys::{KeySet, SigningKey};

/// RSA generation is slow in debug builds; do it once per test binary.
static PEM_PAIRS: Lazy<Vec<(String, String)>> = Lazy::new(|| {
    (0..2).map(|_| generate_pem_pair(2048)).collect()
});

pub fn generate_pem_pair(bits: usize) -> (String, String) {
    let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits).unwrap();
    let private_pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
    let public_pem = private_key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap();
    (private_pem, public_pem)
}

/// `(private_pem, public_pem)` for fixture key `index` (0 or 1).
pub fn pem_pair(index: usize) -> (String, String) {
    PEM_PAIRS[index].clone()
}

pub fn signing_key(key_id: &str, index: usize) -> SigningKey {
    let (private_pem, public_pem) = pem_pair(index);
    SigningKey::from_pem(key_id, &private_pem, &public_pem).unwrap()
}

/// Two keys, `old` (retiring) and `new` (active).
pub fn rollover_key_set() -> KeySet {
    KeySet::from_keys(vec![signing_key("old", 0), signing_key("new", 1)], "new").unwrap()
}

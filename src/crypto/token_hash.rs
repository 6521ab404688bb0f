use sha2::{Digest, Sha256};

/// Hashes a refresh token for storage. Only this digest ever reaches the
/// session store.
///
/// # Returns
///
/// The lowercase hex SHA-256 of the token's UTF-8 bytes.
pub fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

//! Lookup keys for issued tokens.

use sha2::{Digest, Sha256};

/// Hash a raw token for indexed lookup and revocation.
///
/// SHA-256, lowercase hex (64 characters).
#[must_use]
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

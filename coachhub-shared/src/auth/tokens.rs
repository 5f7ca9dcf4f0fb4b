/// Opaque one-time tokens
///
/// Password-reset tokens are random hex strings handed to the user once;
/// only their SHA-256 digest is stored. The same digest is used to remember
/// the current refresh token so that a refresh token can be used exactly
/// once (rotation).
///
/// # Example
///
/// ```
/// use coachhub_shared::auth::tokens::{generate_token, hash_token, verify_token};
///
/// let (token, hash) = generate_token();
/// assert_eq!(hash, hash_token(&token));
/// assert!(verify_token(&token, &hash));
/// ```

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Random bytes per token (hex-encoded to twice this length)
pub const TOKEN_BYTES: usize = 32;

/// Generates a random token and its digest.
///
/// Returns `(plaintext, sha256_hex)`; persist only the digest.
pub fn generate_token() -> (String, String) {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);

    let token = hex::encode(bytes);
    let hash = hash_token(&token);
    (token, hash)
}

/// Hex-encoded SHA-256 of `token`
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Compares `token` against a stored digest without early exit.
pub fn verify_token(token: &str, stored_hash: &str) -> bool {
    constant_time_eq(hash_token(token).as_bytes(), stored_hash.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

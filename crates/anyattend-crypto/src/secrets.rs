//! One-time codes, bearer tokens, and their stored digests.
//!
//! All randomness comes from the operating system CSPRNG (`OsRng`).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Number of digits in ownership challenge and pairing codes.
pub const CODE_DIGITS: usize = 6;

const NONCE_BYTES: usize = 16;

/// Generate a uniformly distributed numeric code of `CODE_DIGITS` digits,
/// zero-padded (e.g. `"004217"`).
pub fn random_numeric_code() -> String {
    let n: u32 = OsRng.gen_range(0..1_000_000);
    format!("{n:06}")
}

/// Whether `code` has the exact shape of a one-time code.
pub fn is_numeric_code(code: &str) -> bool {
    code.len() == CODE_DIGITS && code.bytes().all(|b| b.is_ascii_digit())
}

/// Generate a random bearer token of `byte_len` bytes, base64url without
/// padding.
pub fn random_token(byte_len: usize) -> String {
    let mut buf = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Per-command nonce: 16 random bytes, lowercase hex.
pub fn create_nonce() -> String {
    let mut buf = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// One-way digest of a code or token for storage (lowercase hex SHA-256).
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Compare two strings without short-circuiting on the first differing byte.
///
/// Strings of different length compare unequal.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

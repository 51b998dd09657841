use rand::{distributions::Uniform, Rng, RngCore};
use sha2::{Digest, Sha256};

/// Length in bytes of the random link token; rendered as 64 hex chars.
pub const TOKEN_BYTES: usize = 32;

/// Minimum token length the public endpoints will even look at.
pub const MIN_TOKEN_LEN: usize = 32;

/// Digits in a generated one-time code.
pub const OTP_DIGITS: usize = 6;

/// Generate the random public-link token.
///
/// The raw value is handed to the caller exactly once; only its hash is
/// ever persisted.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a numeric one-time code.
pub fn generate_otp() -> String {
    let digit = Uniform::from(0..10u8);
    rand::thread_rng()
        .sample_iter(digit)
        .take(OTP_DIGITS)
        .map(|d| char::from(b'0' + d))
        .collect()
}

/// One-way hash used for tokens, codes, and audit payloads.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

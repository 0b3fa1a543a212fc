//! Salted credential hashing.
//!
//! Login and transaction passwords are stored only as salted SHA-256
//! digests; plaintext never outlives the single verification call.

use rand::Rng;
use rand::distributions::Alphanumeric;
use sha2::{Digest, Sha256};

const SALT_LEN: usize = 16;

/// A salted hash of a login or transaction password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    salt: String,
    hash: String,
}

impl Credential {
    /// Hash a plaintext secret under a fresh random salt.
    pub fn new(secret: &str) -> Self {
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LEN)
            .map(char::from)
            .collect();
        let hash = digest(&salt, secret);
        Self { salt, hash }
    }

    /// Check a plaintext secret against the stored hash.
    pub fn verify(&self, secret: &str) -> bool {
        let candidate = digest(&self.salt, secret);
        // Compare every byte to avoid early-exit timing differences.
        candidate.len() == self.hash.len()
            && candidate
                .bytes()
                .zip(self.hash.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

fn digest(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

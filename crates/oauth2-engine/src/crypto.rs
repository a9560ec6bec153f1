//! Secret hashing and token lookup keys.
//!
//! Client secrets and user passwords are stored as PBKDF2-HMAC-SHA256 hashes and
//! compared in constant time. Access and refresh tokens are stored and looked
//! up by a SHA-256 digest, so a leaked token table yields no usable bearer.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Default PBKDF2 iteration count.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Derive the storage key for a raw access or refresh token.
#[must_use]
pub fn token_key(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// One-way hashing of client secrets and user passwords.
pub trait SecretVerifier: Send + Sync {
    /// Hash a secret for storage.
    fn hash(&self, secret: &str) -> String;

    /// Compare a presented secret against a stored hash.
    fn verify(&self, secret: &str, stored: &str) -> bool;
}

/// Malformed stored hash.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("unknown hash scheme {0:?}")]
    Scheme(String),

    #[error("hash has {0} fields, expected 4")]
    Fields(usize),

    #[error("invalid iteration count: {0}")]
    Iterations(String),

    #[error("invalid base64 in {field}")]
    Encoding { field: &'static str },
}

/// PBKDF2-HMAC-SHA256 with a random per-secret salt.
///
/// Hashes are self-describing: `pbkdf2-sha256$<iterations>$<salt>$<hash>`, so the
/// iteration count can be raised without invalidating existing hashes.
#[derive(Debug, Clone, Copy)]
pub struct Pbkdf2Hasher {
    iterations: u32,
}

impl Pbkdf2Hasher {
    #[must_use]
    pub const fn new() -> Self {
        Self { iterations: DEFAULT_ITERATIONS }
    }

    #[must_use]
    pub fn with_iterations(iterations: u32) -> Self {
        Self { iterations: iterations.max(1) }
    }

    fn derive(secret: &str, salt: &[u8], iterations: u32) -> [u8; HASH_LEN] {
        let mut out = [0u8; HASH_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, iterations, &mut out);
        out
    }

    fn parse(stored: &str) -> Result<(u32, Vec<u8>, Vec<u8>), HashError> {
        let parts: Vec<&str> = stored.split('$').collect();
        if parts.len() != 4 {
            return Err(HashError::Fields(parts.len()));
        }
        if parts[0] != SCHEME {
            return Err(HashError::Scheme(parts[0].to_owned()));
        }
        let iterations: u32 =
            parts[1].parse().map_err(|_| HashError::Iterations(parts[1].to_owned()))?;
        if iterations == 0 {
            return Err(HashError::Iterations(parts[1].to_owned()));
        }
        let salt = STANDARD_NO_PAD
            .decode(parts[2])
            .map_err(|_| HashError::Encoding { field: "salt" })?;
        let hash = STANDARD_NO_PAD
            .decode(parts[3])
            .map_err(|_| HashError::Encoding { field: "hash" })?;
        Ok((iterations, salt, hash))
    }
}

impl Default for Pbkdf2Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretVerifier for Pbkdf2Hasher {
    fn hash(&self, secret: &str) -> String {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let hash = Self::derive(secret, &salt, self.iterations);
        format!(
            "{SCHEME}${}${}${}",
            self.iterations,
            STANDARD_NO_PAD.encode(salt),
            STANDARD_NO_PAD.encode(hash)
        )
    }

    fn verify(&self, secret: &str, stored: &str) -> bool {
        let (iterations, salt, expected) = match Self::parse(stored) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(error = %e, "Stored secret hash is malformed");
                return false;
            }
        };
        let computed = Self::derive(secret, &salt, iterations);
        if computed.len() != expected.len() {
            return false;
        }
        computed[..].ct_eq(&expected[..]).into()
    }
}

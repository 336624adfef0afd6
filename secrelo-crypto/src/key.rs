//! Password-based key derivation (Argon2id) and symmetric key types.

use crate::error::{CryptoError, CryptoResult};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Argon2id salt size in bytes (libsodium `crypto_pwhash_SALTBYTES`).
pub const SALT_SIZE: usize = 16;

/// A 256-bit symmetric key. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Argon2id salt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// Argon2id cost parameters, stored next to every envelope.
///
/// Uses libsodium's units: `ops_limit` is the iteration count and
/// `mem_limit` is in bytes. Parallelism is fixed at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub ops_limit: u64,
    pub mem_limit: u64,
}

impl KdfParams {
    /// libsodium `OPSLIMIT_INTERACTIVE` / `MEMLIMIT_INTERACTIVE`.
    pub const INTERACTIVE: KdfParams = KdfParams {
        ops_limit: 2,
        mem_limit: 64 * 1024 * 1024,
    };

    /// libsodium `OPSLIMIT_MODERATE` / `MEMLIMIT_MODERATE`.
    pub const MODERATE: KdfParams = KdfParams {
        ops_limit: 3,
        mem_limit: 256 * 1024 * 1024,
    };

    /// libsodium `OPSLIMIT_SENSITIVE` / `MEMLIMIT_SENSITIVE`.
    pub const SENSITIVE: KdfParams = KdfParams {
        ops_limit: 4,
        mem_limit: 1024 * 1024 * 1024,
    };

    pub fn new(ops_limit: u64, mem_limit: u64) -> Self {
        Self {
            ops_limit,
            mem_limit,
        }
    }

    fn to_argon2(self) -> CryptoResult<Argon2<'static>> {
        let t_cost = u32::try_from(self.ops_limit).map_err(|_| {
            CryptoError::InvalidKdfParams(format!(
                "ops limit out of range: {}",
                self.ops_limit
            ))
        })?;
        let m_cost = u32::try_from(self.mem_limit / 1024).map_err(|_| {
            CryptoError::InvalidKdfParams(format!(
                "memory limit out of range: {}",
                self.mem_limit
            ))
        })?;

        let params = Params::new(m_cost, t_cost, 1, Some(KEY_SIZE))
            .map_err(|e| CryptoError::InvalidKdfParams(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::INTERACTIVE
    }
}

/// Derives a 32-byte wrapping key from a password.
///
/// Deterministic for identical inputs. There is no separate password
/// verifier: a wrong password only shows up when the key fails to
/// authenticate the envelope it was derived for.
pub fn derive_key(password: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<DerivedKey> {
    let argon2 = params.to_argon2()?;
    let mut out = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut out)
        .map_err(|e| CryptoError::KeyDerivationUnavailable(e.to_string()))?;

    let key = DerivedKey::from_bytes(out);
    out.zeroize();
    Ok(key)
}

/// Generates a random 256-bit key (DEKs, per-session backup keys).
pub fn generate_random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let key = DerivedKey::from_bytes(bytes);
    bytes.zeroize();
    key
}

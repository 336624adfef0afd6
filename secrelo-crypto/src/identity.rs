//! User identity keypairs and their password-protected envelopes.
//!
//! The public key is stored by the server in plaintext. The private key is
//! stored as an [`EncryptedPrivateKeyEnvelope`]: XChaCha20-Poly1305 under an
//! Argon2id key derived from the user's password, with the salt and cost
//! parameters kept alongside so they can be raised later.

use crate::cipher::{self, EncryptedData, NONCE_SIZE};
use crate::encoding::{self, b64, b64_array};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
use crypto_box::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::Zeroizing;

/// X25519 encryption keypair (not a signing key).
///
/// The secret key implements `ZeroizeOnDrop` (from crypto_box). Not `Clone`:
/// a session holds exactly one copy.
pub struct Keypair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl Keypair {
    /// Returns the public key as raw 32-byte array.
    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// Returns a copy of the secret key bytes, wiped when dropped.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Reconstructs a keypair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = SecretKey::from(bytes);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Hex SHA-256 of the public key, for out-of-band comparison.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &short_key(self.public.as_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Generates a new identity keypair.
pub fn generate_keypair() -> Keypair {
    let secret = SecretKey::generate(&mut rand::rngs::OsRng);
    let public = secret.public_key();
    Keypair { public, secret }
}

/// Hex SHA-256 fingerprint of a public key.
pub fn fingerprint(public: &PublicKey) -> String {
    hex::encode(Sha256::digest(public.as_bytes()))
}

/// Shortened base64 form of a key (`abcdef...uvwxyz`) for display.
pub fn short_key(bytes: &[u8]) -> String {
    let full = encoding::encode(bytes);
    if full.len() <= 12 {
        return full;
    }
    format!("{}...{}", &full[..6], &full[full.len() - 6..])
}

/// Server-persisted form of a user's private key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPrivateKeyEnvelope {
    #[serde(rename = "encrypted_private_key", with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(rename = "private_key_nonce", with = "b64_array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(rename = "private_key_salt", with = "b64_array")]
    pub kdf_salt: [u8; SALT_SIZE],
    #[serde(rename = "kdf_ops")]
    pub kdf_ops_limit: u64,
    #[serde(rename = "kdf_mem")]
    pub kdf_mem_limit: u64,
}

impl EncryptedPrivateKeyEnvelope {
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams::new(self.kdf_ops_limit, self.kdf_mem_limit)
    }

    fn encrypted_data(&self) -> EncryptedData {
        EncryptedData {
            ciphertext: self.ciphertext.clone(),
            nonce: self.nonce,
        }
    }
}

/// Encrypts a private key under a password (registration, password change).
pub fn seal_private_key(
    keypair: &Keypair,
    password: &str,
    params: &KdfParams,
) -> CryptoResult<EncryptedPrivateKeyEnvelope> {
    let salt = Salt::random();
    let wrapping_key = derive_key(password, &salt, params)?;
    let secret = keypair.secret_bytes();
    let encrypted = cipher::encrypt(&wrapping_key, secret.as_ref())?;

    Ok(EncryptedPrivateKeyEnvelope {
        ciphertext: encrypted.ciphertext,
        nonce: encrypted.nonce,
        kdf_salt: *salt.as_bytes(),
        kdf_ops_limit: params.ops_limit,
        kdf_mem_limit: params.mem_limit,
    })
}

/// Decrypts the raw private key bytes from an envelope.
///
/// This is the expensive step (Argon2id); callers on an interactive thread
/// should run it through the background worker.
pub fn unwrap_private_key_bytes(
    envelope: &EncryptedPrivateKeyEnvelope,
    password: &str,
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let salt = Salt::from_bytes(envelope.kdf_salt);
    let wrapping_key = derive_key(password, &salt, &envelope.kdf_params())?;

    let plaintext = Zeroizing::new(
        cipher::decrypt(&wrapping_key, &envelope.encrypted_data())
            .map_err(|_| CryptoError::InvalidPassword)?,
    );

    if plaintext.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: plaintext.len(),
        });
    }

    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    bytes.copy_from_slice(&plaintext);
    Ok(bytes)
}

/// Rebuilds a keypair from unwrapped secret bytes, checking it against the
/// public key the server holds for this user.
pub fn keypair_from_unwrapped(
    secret: Zeroizing<[u8; KEY_SIZE]>,
    expected_public: &PublicKey,
) -> CryptoResult<Keypair> {
    let keypair = Keypair::from_secret_bytes(*secret);
    if keypair.public != *expected_public {
        return Err(CryptoError::PublicKeyMismatch);
    }
    Ok(keypair)
}

/// Unwraps a user's keypair with their password.
///
/// A wrong password surfaces as [`CryptoError::InvalidPassword`] and never
/// yields a key.
pub fn unwrap_private_key(
    envelope: &EncryptedPrivateKeyEnvelope,
    password: &str,
    public: &PublicKey,
) -> CryptoResult<Keypair> {
    let secret = unwrap_private_key_bytes(envelope, password)?;
    keypair_from_unwrapped(secret, public)
}

/// Re-encrypts an envelope under a new password and/or KDF cost.
///
/// The keypair itself is unchanged, so every existing wrapped key for this
/// user stays valid.
pub fn rewrap_private_key(
    envelope: &EncryptedPrivateKeyEnvelope,
    old_password: &str,
    new_password: &str,
    new_params: &KdfParams,
) -> CryptoResult<EncryptedPrivateKeyEnvelope> {
    let secret = unwrap_private_key_bytes(envelope, old_password)?;
    let keypair = Keypair::from_secret_bytes(*secret);
    let rewrapped = seal_private_key(&keypair, new_password, new_params)?;
    debug!(
        "rewrapped private key envelope (ops {} -> {}, mem {} -> {})",
        envelope.kdf_ops_limit, new_params.ops_limit, envelope.kdf_mem_limit, new_params.mem_limit
    );
    Ok(rewrapped)
}

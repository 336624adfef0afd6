//! Symmetric encryption under a single 32-byte key.
//!
//! [`encrypt`]/[`decrypt`] use XChaCha20-Poly1305 (tag appended) and protect
//! password-sealed private keys and the session backup. Secret payloads use
//! [`secretbox_encrypt`]/[`secretbox_decrypt`]: libsodium `crypto_secretbox`
//! (XSalsa20-Poly1305, tag prepended), the format the secrets API stores.

use crate::encoding::{b64, b64_array};
use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use crypto_secretbox::XSalsa20Poly1305;
use serde::{Deserialize, Serialize};

/// XChaCha20 nonce size in bytes.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Ciphertext (with appended tag) plus the random nonce it was sealed with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_SIZE],
}

/// Encrypts `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut rand::rngs::OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&nonce);

    Ok(EncryptedData {
        ciphertext,
        nonce: nonce_bytes,
    })
}

/// Decrypts and authenticates `data` under `key`.
///
/// A wrong key, a modified nonce and a modified ciphertext are
/// indistinguishable and all yield [`CryptoError::DecryptionFailed`].
pub fn decrypt(key: &DerivedKey, data: &EncryptedData) -> CryptoResult<Vec<u8>> {
    if data.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(XNonce::from_slice(&data.nonce), data.ciphertext.as_ref())
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Seals `plaintext` under `key` in libsodium secretbox layout
/// (`tag || ciphertext`) with a fresh random nonce.
pub fn secretbox_encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    let cipher = XSalsa20Poly1305::new(crypto_secretbox::Key::from_slice(key.as_bytes()));
    let nonce = XSalsa20Poly1305::generate_nonce(&mut rand::rngs::OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&nonce);

    Ok(EncryptedData {
        ciphertext,
        nonce: nonce_bytes,
    })
}

/// Opens a libsodium secretbox. Failures collapse to
/// [`CryptoError::DecryptionFailed`].
pub fn secretbox_decrypt(key: &DerivedKey, data: &EncryptedData) -> CryptoResult<Vec<u8>> {
    if data.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let cipher = XSalsa20Poly1305::new(crypto_secretbox::Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            crypto_secretbox::Nonce::from_slice(&data.nonce),
            data.ciphertext.as_ref(),
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

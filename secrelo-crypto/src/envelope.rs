//! Hybrid envelope encryption for secret payloads.
//!
//! Each secret gets a fresh random DEK (Data Encryption Key). The payload is
//! sealed under the DEK with `crypto_secretbox` (XSalsa20-Poly1305), and the DEK is wrapped once per
//! recipient with X25519 + XSalsa20-Poly1305. Every wrap uses its own
//! ephemeral sender keypair, so wraps are unlinkable to the encrypting
//! user's identity key (and carry no sender authentication).

use crate::cipher::{self, EncryptedData, NONCE_SIZE};
use crate::encoding::{b64, b64_array};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{generate_random_key, DerivedKey};
use crate::types::{Recipient, SecretMetadata, UserId};
use crypto_box::aead::Aead;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use zeroize::Zeroizing;

/// Data Encryption Key. Wiped on drop.
pub type Dek = DerivedKey;

/// Box nonce size in bytes.
pub const BOX_NONCE_SIZE: usize = 24;

/// A DEK sealed for exactly one recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    #[serde(rename = "user_id")]
    pub recipient_user_id: UserId,
    #[serde(with = "b64")]
    pub encrypted_key: Vec<u8>,
    #[serde(with = "b64_array")]
    pub nonce: [u8; BOX_NONCE_SIZE],
    /// Ephemeral X25519 public key (sender side of DH).
    #[serde(rename = "sender_public_key", with = "b64_array")]
    pub ephemeral_sender_public_key: [u8; 32],
}

/// An encrypted secret with one wrapped DEK per authorized member.
///
/// The set of `wrapped_keys` recipients is exactly the member set; a member
/// without a wrap has no access.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    #[serde(rename = "encrypted_secret", with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(rename = "encrypted_keys")]
    pub wrapped_keys: Vec<WrappedKey>,
    /// Incremented on every value or DEK change, never on metadata edits.
    pub version: u32,
    pub metadata: SecretMetadata,
}

impl EncryptedSecret {
    /// Returns the wrap addressed to `user_id`, if any.
    pub fn wrapped_key_for(&self, user_id: &UserId) -> Option<&WrappedKey> {
        self.wrapped_keys
            .iter()
            .find(|wk| &wk.recipient_user_id == user_id)
    }

    pub fn recipient_ids(&self) -> impl Iterator<Item = &UserId> {
        self.wrapped_keys.iter().map(|wk| &wk.recipient_user_id)
    }

    pub fn has_recipient(&self, user_id: &UserId) -> bool {
        self.wrapped_key_for(user_id).is_some()
    }

    fn payload(&self) -> EncryptedData {
        EncryptedData {
            ciphertext: self.ciphertext.clone(),
            nonce: self.nonce,
        }
    }
}

/// Seals (encrypts) a DEK for a recipient using an ephemeral sender keypair.
pub fn seal_dek(dek: &Dek, recipient_user_id: &UserId, recipient_pk: &PublicKey) -> CryptoResult<WrappedKey> {
    let ephemeral = SecretKey::generate(&mut rand::rngs::OsRng);
    let ephemeral_pk = ephemeral.public_key();

    let salsa_box = SalsaBox::new(recipient_pk, &ephemeral);

    let mut nonce_bytes = [0u8; BOX_NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let encrypted_key = salsa_box
        .encrypt(
            crypto_box::Nonce::from_slice(&nonce_bytes),
            dek.as_bytes().as_ref(),
        )
        .map_err(|e| CryptoError::Encryption(format!("DEK wrap failed: {e}")))?;

    Ok(WrappedKey {
        recipient_user_id: recipient_user_id.clone(),
        encrypted_key,
        nonce: nonce_bytes,
        ephemeral_sender_public_key: *ephemeral_pk.as_bytes(),
    })
}

/// Opens (decrypts) a wrapped DEK with the recipient's secret key.
pub fn open_dek(wrapped: &WrappedKey, recipient_sk: &SecretKey) -> CryptoResult<Dek> {
    let ephemeral_pk = PublicKey::from(wrapped.ephemeral_sender_public_key);
    let salsa_box = SalsaBox::new(&ephemeral_pk, recipient_sk);

    let plaintext = Zeroizing::new(
        salsa_box
            .decrypt(
                crypto_box::Nonce::from_slice(&wrapped.nonce),
                wrapped.encrypted_key.as_ref(),
            )
            .map_err(|_| CryptoError::DecryptionFailed)?,
    );

    DerivedKey::from_slice(&plaintext).map_err(|_| CryptoError::DecryptionFailed)
}

/// Wraps `dek` for every recipient, rejecting empty and duplicate lists.
pub(crate) fn wrap_for_recipients(dek: &Dek, recipients: &[Recipient]) -> CryptoResult<Vec<WrappedKey>> {
    if recipients.is_empty() {
        return Err(CryptoError::NoRecipients);
    }

    let mut seen = HashSet::with_capacity(recipients.len());
    let mut wrapped_keys = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        if !seen.insert(&recipient.user_id) {
            return Err(CryptoError::DuplicateRecipient(recipient.user_id.to_string()));
        }
        wrapped_keys.push(seal_dek(dek, &recipient.user_id, &recipient.public_key)?);
    }
    Ok(wrapped_keys)
}

/// Builds a secret from a payload and a DEK the caller has just generated.
pub(crate) fn seal_payload(
    dek: &Dek,
    plaintext: &[u8],
    recipients: &[Recipient],
    version: u32,
    metadata: SecretMetadata,
) -> CryptoResult<EncryptedSecret> {
    let wrapped_keys = wrap_for_recipients(dek, recipients)?;
    let payload = cipher::secretbox_encrypt(dek, plaintext)?;

    Ok(EncryptedSecret {
        ciphertext: payload.ciphertext,
        nonce: payload.nonce,
        wrapped_keys,
        version,
        metadata,
    })
}

/// Encrypts `plaintext` for a set of recipients under a fresh DEK.
///
/// The DEK is dropped (and wiped) before returning.
pub fn encrypt_for_recipients(
    plaintext: &[u8],
    recipients: &[Recipient],
    metadata: SecretMetadata,
) -> CryptoResult<EncryptedSecret> {
    let dek = generate_random_key();
    let secret = seal_payload(&dek, plaintext, recipients, 1, metadata)?;
    debug!("encrypted secret for {} recipients", recipients.len());
    Ok(secret)
}

/// Recovers the DEK of `secret` using the caller's own wrap.
pub fn recover_dek(secret: &EncryptedSecret, my_user_id: &UserId, my_sk: &SecretKey) -> CryptoResult<Dek> {
    let wrapped = secret
        .wrapped_key_for(my_user_id)
        .ok_or_else(|| CryptoError::NotAuthorized {
            user_id: my_user_id.to_string(),
        })?;
    open_dek(wrapped, my_sk)
}

/// Decrypts a secret for the calling user.
///
/// Fails with [`CryptoError::NotAuthorized`] when the user has no wrap and
/// with [`CryptoError::DecryptionFailed`] on any authentication failure.
pub fn decrypt_for_self(
    secret: &EncryptedSecret,
    my_user_id: &UserId,
    my_sk: &SecretKey,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let dek = recover_dek(secret, my_user_id, my_sk)?;
    cipher::secretbox_decrypt(&dek, &secret.payload()).map(Zeroizing::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::generate_keypair;

    #[test]
    fn seal_open_roundtrip() {
        let recipient = generate_keypair();
        let dek = generate_random_key();
        let user = UserId::new("u1");

        let wrapped = seal_dek(&dek, &user, &recipient.public).unwrap();
        let opened = open_dek(&wrapped, &recipient.secret).unwrap();
        assert_eq!(opened.as_bytes(), dek.as_bytes());
    }

    #[test]
    fn each_seal_uses_fresh_ephemeral_key_and_nonce() {
        let recipient = generate_keypair();
        let dek = generate_random_key();
        let user = UserId::new("u1");

        let a = seal_dek(&dek, &user, &recipient.public).unwrap();
        let b = seal_dek(&dek, &user, &recipient.public).unwrap();
        assert_ne!(a.ephemeral_sender_public_key, b.ephemeral_sender_public_key);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.encrypted_key, b.encrypted_key);
    }

    #[test]
    fn wrong_recipient_key_fails_to_open() {
        let target = generate_keypair();
        let other = generate_keypair();
        let wrapped = seal_dek(&generate_random_key(), &UserId::new("u1"), &target.public).unwrap();
        assert!(matches!(
            open_dek(&wrapped, &other.secret),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn empty_recipient_list_rejected() {
        let err = encrypt_for_recipients(b"x", &[], SecretMetadata::default()).unwrap_err();
        assert!(matches!(err, CryptoError::NoRecipients));
    }

    #[test]
    fn duplicate_recipient_rejected() {
        let kp = generate_keypair();
        let recipients = vec![
            Recipient::new("u1", kp.public.clone()),
            Recipient::new("u1", kp.public.clone()),
        ];
        let err = encrypt_for_recipients(b"x", &recipients, SecretMetadata::default()).unwrap_err();
        assert!(matches!(err, CryptoError::DuplicateRecipient(id) if id == "u1"));
    }
}

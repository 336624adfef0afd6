//! End-to-end encryption core for Secrelo.
//!
//! Pure, synchronous transforms over bytes supplied by the caller. No
//! networking or persistence happens here.
//!
//! # Architecture
//!
//! 1. **Identity**: each user owns an X25519 keypair. The public key is
//!    stored in plaintext; the private key is stored as a password envelope
//!    (Argon2id -> XChaCha20-Poly1305) and only ever decrypted client-side.
//!
//! 2. **Secrets**: every secret is sealed with `crypto_secretbox` under its
//!    own random DEK. The DEK is wrapped once per authorized member with
//!    X25519 + XSalsa20-Poly1305, using a fresh ephemeral sender key per wrap.
//!
//! 3. **Re-keying**: granting access adds a wrap; revoking access or
//!    changing the value re-encrypts under a new DEK for the current
//!    member list. Metadata edits never re-key.
//!
//! All binary fields serialize as standard base64.

mod cipher;
pub mod encoding;
pub mod envelope;
mod error;
pub mod identity;
mod key;
pub mod rekey;
pub mod types;

pub use cipher::{
    decrypt, encrypt, secretbox_decrypt, secretbox_encrypt, EncryptedData, NONCE_SIZE, TAG_SIZE,
};
pub use envelope::{
    decrypt_for_self, encrypt_for_recipients, open_dek, recover_dek, seal_dek, Dek,
    EncryptedSecret, WrappedKey,
};
pub use error::{CryptoError, CryptoResult};
pub use identity::{
    generate_keypair, keypair_from_unwrapped, rewrap_private_key, seal_private_key,
    unwrap_private_key, unwrap_private_key_bytes, EncryptedPrivateKeyEnvelope, Keypair,
};
pub use key::{derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
pub use rekey::{apply_edit, grant, revoke, rotate, update_metadata, EditOutcome, Reader, SecretEdit};
pub use types::{Recipient, SecretMetadata, SecretType, UserId};

pub use crypto_box::{PublicKey, SecretKey};

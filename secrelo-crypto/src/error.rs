//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by the encryption core.
///
/// Every variant is a hard failure. Callers choose the user-facing message;
/// the core never downgrades an authentication failure to an empty result.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The KDF could not be initialized with the requested parameters.
    #[error("key derivation unavailable: {0}")]
    KeyDerivationUnavailable(String),

    /// The envelope's KDF parameters are outside what Argon2id accepts.
    #[error("invalid KDF parameters: {0}")]
    InvalidKdfParams(String),

    /// The private key envelope did not authenticate under the derived key.
    ///
    /// Deliberately carries no detail: a wrong password and an envelope that
    /// belongs to another account look identical.
    #[error("private key not loaded")]
    InvalidPassword,

    #[error("no wrapped key for user {user_id}")]
    NotAuthorized { user_id: String },

    #[error("decryption failed (wrong key or tampered data)")]
    DecryptionFailed,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// The unwrapped private key does not belong to the supplied public key.
    #[error("private key does not match the stored public key")]
    PublicKeyMismatch,

    #[error("duplicate recipient: {0}")]
    DuplicateRecipient(String),

    #[error("a secret needs at least one recipient")]
    NoRecipients,

    /// The secret's version counter cannot be incremented any further.
    #[error("secret version {0} cannot be incremented")]
    VersionOverflow(u32),

    #[error("encoding error: {0}")]
    Encoding(String),
}

impl CryptoError {
    /// Only infrastructure failures may be retried with the same inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CryptoError::KeyDerivationUnavailable(_))
    }
}

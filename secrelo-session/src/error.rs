//! Session error types.

use secrelo_crypto::CryptoError;
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by the session vault, unlock worker and client session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A private-key operation was attempted while the vault is locked or empty.
    #[error("vault is locked")]
    VaultLocked,

    /// A key backup exists but could not be decrypted. The vault stays empty.
    #[error("session restore failed: {0}")]
    SessionRestoreFailed(String),

    /// The background worker could not be started or died mid-request.
    #[error("key derivation unavailable: {0}")]
    KeyDerivationUnavailable(String),

    /// The login response carried no encrypted keypair.
    #[error("no encryption keys in login response")]
    NoEncryptionKeys,

    /// The auth session has ended; the user must log in again.
    #[error("authentication required")]
    AuthRequired,

    #[error("session storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    /// Only transient infrastructure failures may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::KeyDerivationUnavailable(_) => true,
            SessionError::Crypto(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// True when the caller must prompt for the password again.
    pub fn is_invalid_password(&self) -> bool {
        matches!(self, SessionError::Crypto(CryptoError::InvalidPassword))
    }
}

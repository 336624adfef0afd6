//! Encrypted keypair backup in tab-scoped storage.
//!
//! The backup lets a page reload restore an unlocked vault without asking
//! for the password again. It is sealed under a per-session key that lives
//! only in the same tab-scoped store, so it dies with the tab.

use crate::error::{SessionError, SessionResult};
use crate::store::{SessionStore, KEY_BACKUP_SLOT, SESSION_KEY_SLOT};
use secrelo_crypto::encoding::{self, b64, b64_array, b64_public_key};
use secrelo_crypto::{
    decrypt, encrypt, generate_random_key, keypair_from_unwrapped, DerivedKey, EncryptedData,
    Keypair, PublicKey, KEY_SIZE, NONCE_SIZE,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Stored form of the backup: the public key in clear, the private key
/// sealed under the session key.
#[derive(Serialize, Deserialize)]
struct KeyBackup {
    #[serde(rename = "pub", with = "b64_public_key")]
    public_key: PublicKey,
    #[serde(rename = "priv", with = "b64")]
    sealed_private_key: Vec<u8>,
    #[serde(with = "b64_array")]
    nonce: [u8; NONCE_SIZE],
}

/// Returns the tab's session key, generating and storing one if absent.
///
/// An unreadable stored key is replaced. Any backup sealed under the old key
/// then fails to open and is discarded by the caller.
pub(crate) fn load_or_create_session_key(store: &dyn SessionStore) -> DerivedKey {
    if let Some(text) = store.get(SESSION_KEY_SLOT) {
        match encoding::decode_array::<KEY_SIZE>(&text) {
            Ok(bytes) => return DerivedKey::from_bytes(bytes),
            Err(_) => warn!("stored session key is malformed, generating a new one"),
        }
    }

    let key = generate_random_key();
    store.set(SESSION_KEY_SLOT, encoding::encode(key.as_bytes()));
    debug!("generated new session key");
    key
}

/// Seals `keypair` under `session_key` and writes it to the backup slot.
pub(crate) fn write_backup(
    store: &dyn SessionStore,
    session_key: &DerivedKey,
    keypair: &Keypair,
) -> SessionResult<()> {
    let secret = keypair.secret_bytes();
    let sealed = encrypt(session_key, secret.as_slice())?;

    let backup = KeyBackup {
        public_key: keypair.public.clone(),
        sealed_private_key: sealed.ciphertext,
        nonce: sealed.nonce,
    };
    store.set(KEY_BACKUP_SLOT, serde_json::to_string(&backup)?);
    debug!("wrote key backup");
    Ok(())
}

/// Restores the keypair from the backup slot.
///
/// Returns `Ok(None)` when no backup exists. Any failure to parse, open or
/// verify the backup yields [`SessionError::SessionRestoreFailed`] and never
/// a partial keypair.
pub(crate) fn read_backup(
    store: &dyn SessionStore,
    session_key: &DerivedKey,
) -> SessionResult<Option<Keypair>> {
    let Some(text) = store.get(KEY_BACKUP_SLOT) else {
        return Ok(None);
    };

    let backup: KeyBackup = serde_json::from_str(&text)
        .map_err(|e| SessionError::SessionRestoreFailed(format!("malformed backup: {e}")))?;

    let opened = Zeroizing::new(
        decrypt(
            session_key,
            &EncryptedData {
                ciphertext: backup.sealed_private_key,
                nonce: backup.nonce,
            },
        )
        .map_err(|_| SessionError::SessionRestoreFailed("backup does not open".to_string()))?,
    );

    if opened.len() != KEY_SIZE {
        return Err(SessionError::SessionRestoreFailed(format!(
            "backup holds {} bytes, expected {KEY_SIZE}",
            opened.len()
        )));
    }
    let mut secret = Zeroizing::new([0u8; KEY_SIZE]);
    secret.copy_from_slice(&opened);

    let keypair = keypair_from_unwrapped(secret, &backup.public_key)
        .map_err(|e| SessionError::SessionRestoreFailed(e.to_string()))?;
    debug!("restored keypair from backup");
    Ok(Some(keypair))
}

pub(crate) fn remove_backup(store: &dyn SessionStore) {
    store.remove(KEY_BACKUP_SLOT);
}

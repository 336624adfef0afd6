//! DEK redistribution on membership and value changes.
//!
//! - **Grant** adds one wrap for a new member. DEK, ciphertext and version
//!   are untouched, so every existing wrap keeps working.
//! - **Revoke** and **Rotate** generate a brand-new DEK, re-encrypt the
//!   payload and issue a complete new wrap set for the current members.
//!   Every old wrap becomes useless.
//! - Metadata edits never re-key.

use crate::envelope::{recover_dek, seal_dek, seal_payload, EncryptedSecret, WrappedKey};
use crate::error::{CryptoError, CryptoResult};
use crate::key::generate_random_key;
use crate::types::{Recipient, SecretMetadata, UserId};
use crypto_box::SecretKey;
use tracing::debug;
use zeroize::Zeroizing;

/// The authorized member performing a re-key operation.
///
/// Borrowed for the duration of one call; the secret key stays owned by
/// the session vault.
#[derive(Clone, Copy)]
pub struct Reader<'a> {
    pub user_id: &'a UserId,
    pub secret_key: &'a SecretKey,
}

impl<'a> Reader<'a> {
    pub fn new(user_id: &'a UserId, secret_key: &'a SecretKey) -> Self {
        Self {
            user_id,
            secret_key,
        }
    }
}

/// Adds a wrap for `new_member` using the existing DEK.
///
/// Used when a pending member is approved into a repo that already holds
/// secrets. Fails with [`CryptoError::DuplicateRecipient`] if the member is
/// already a recipient. Returns a copy of the appended wrap for upload.
pub fn grant(
    secret: &mut EncryptedSecret,
    granter: Reader<'_>,
    new_member: &Recipient,
) -> CryptoResult<WrappedKey> {
    if secret.has_recipient(&new_member.user_id) {
        return Err(CryptoError::DuplicateRecipient(new_member.user_id.to_string()));
    }

    let dek = recover_dek(secret, granter.user_id, granter.secret_key)?;
    let wrapped = seal_dek(&dek, &new_member.user_id, &new_member.public_key)?;
    secret.wrapped_keys.push(wrapped.clone());
    debug!(
        "granted access to {} ({} recipients)",
        new_member.user_id,
        secret.wrapped_keys.len()
    );
    Ok(wrapped)
}

/// Re-encrypts `secret` with a fresh DEK for `members`, excluding `revoked`.
///
/// `members` is the authoritative member list after the removal; `revoked`
/// is dropped from it as well so a stale list cannot re-admit them.
pub fn revoke(
    secret: &EncryptedSecret,
    reader: Reader<'_>,
    revoked: &UserId,
    members: &[Recipient],
) -> CryptoResult<EncryptedSecret> {
    let plaintext = decrypt_payload(secret, reader)?;
    let remaining: Vec<Recipient> = members
        .iter()
        .filter(|m| &m.user_id != revoked)
        .cloned()
        .collect();

    let rekeyed = reseal(secret, &plaintext, &remaining)?;
    debug!(
        "revoked {revoked}: re-keyed secret v{} -> v{} for {} recipients",
        secret.version,
        rekeyed.version,
        remaining.len()
    );
    Ok(rekeyed)
}

/// Replaces the secret's value, re-encrypting under a fresh DEK for
/// `members`.
pub fn rotate(
    secret: &EncryptedSecret,
    new_plaintext: &[u8],
    members: &[Recipient],
) -> CryptoResult<EncryptedSecret> {
    let rotated = reseal(secret, new_plaintext, members)?;
    debug!(
        "rotated secret v{} -> v{} for {} recipients",
        secret.version,
        rotated.version,
        members.len()
    );
    Ok(rotated)
}

/// Replaces the metadata without touching ciphertext, wraps or version.
pub fn update_metadata(secret: &mut EncryptedSecret, metadata: SecretMetadata) {
    secret.metadata = metadata;
}

/// An edit submitted from the secret detail view.
#[derive(Default)]
pub struct SecretEdit {
    pub value: Option<Zeroizing<Vec<u8>>>,
    pub metadata: Option<SecretMetadata>,
}

/// What [`apply_edit`] ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditOutcome {
    Unchanged,
    MetadataOnly,
    Rotated,
}

/// Applies an edit, re-keying only if the value actually changed.
///
/// Returns the resulting secret and which path was taken. A submitted value
/// equal to the current plaintext is treated as no value change.
pub fn apply_edit(
    secret: &EncryptedSecret,
    reader: Reader<'_>,
    edit: SecretEdit,
    members: &[Recipient],
) -> CryptoResult<(EncryptedSecret, EditOutcome)> {
    let changed_value = match edit.value {
        Some(value) => {
            let current = decrypt_payload(secret, reader)?;
            (current.as_slice() != value.as_slice()).then_some(value)
        }
        None => None,
    };

    let mut next = match &changed_value {
        Some(value) => rotate(secret, value, members)?,
        None => secret.clone(),
    };

    let metadata_changed = edit
        .metadata
        .as_ref()
        .is_some_and(|m| m != &secret.metadata);
    if let Some(metadata) = edit.metadata {
        update_metadata(&mut next, metadata);
    }

    let outcome = if changed_value.is_some() {
        EditOutcome::Rotated
    } else if metadata_changed {
        EditOutcome::MetadataOnly
    } else {
        EditOutcome::Unchanged
    };
    Ok((next, outcome))
}

fn decrypt_payload(secret: &EncryptedSecret, reader: Reader<'_>) -> CryptoResult<Zeroizing<Vec<u8>>> {
    crate::envelope::decrypt_for_self(secret, reader.user_id, reader.secret_key)
}

fn reseal(secret: &EncryptedSecret, plaintext: &[u8], members: &[Recipient]) -> CryptoResult<EncryptedSecret> {
    let version = secret
        .version
        .checked_add(1)
        .ok_or(CryptoError::VersionOverflow(secret.version))?;
    let dek = generate_random_key();
    seal_payload(&dek, plaintext, members, version, secret.metadata.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::encrypt_for_recipients;
    use crate::identity::generate_keypair;

    #[test]
    fn metadata_update_keeps_ciphertext_and_version() {
        let owner = generate_keypair();
        let secret = encrypt_for_recipients(
            b"v",
            &[Recipient::new("owner", owner.public.clone())],
            SecretMetadata::default(),
        )
        .unwrap();

        let mut edited = secret.clone();
        update_metadata(&mut edited, SecretMetadata::new("renamed", Default::default()));

        assert_eq!(edited.ciphertext, secret.ciphertext);
        assert_eq!(edited.wrapped_keys, secret.wrapped_keys);
        assert_eq!(edited.version, secret.version);
        assert_eq!(edited.metadata.name, "renamed");
    }

    #[test]
    fn rotate_on_empty_members_fails_without_partial_output() {
        let owner = generate_keypair();
        let secret = encrypt_for_recipients(
            b"v",
            &[Recipient::new("owner", owner.public.clone())],
            SecretMetadata::default(),
        )
        .unwrap();
        assert!(matches!(
            rotate(&secret, b"v2", &[]),
            Err(CryptoError::NoRecipients)
        ));
    }

    #[test]
    fn rotate_at_max_version_fails_instead_of_reusing_version() {
        let owner = generate_keypair();
        let members = [Recipient::new("owner", owner.public.clone())];
        let mut secret = encrypt_for_recipients(b"v", &members, SecretMetadata::default()).unwrap();
        secret.version = u32::MAX;

        assert!(matches!(
            rotate(&secret, b"v2", &members),
            Err(CryptoError::VersionOverflow(u32::MAX))
        ));

        secret.version = u32::MAX - 1;
        assert_eq!(rotate(&secret, b"v2", &members).unwrap().version, u32::MAX);
    }
}

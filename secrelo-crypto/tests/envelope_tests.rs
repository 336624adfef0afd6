use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;
use secrelo_crypto::envelope::{decrypt_for_self, encrypt_for_recipients, seal_dek};
use secrelo_crypto::{
    generate_keypair, generate_random_key, CryptoError, EncryptedSecret, Keypair, Recipient, SecretMetadata, SecretType,
    UserId,
};

fn member(id: &str) -> (UserId, Keypair) {
    (UserId::new(id), generate_keypair())
}

fn recipient(id: &UserId, kp: &Keypair) -> Recipient {
    Recipient::new(id.clone(), kp.public.clone())
}

fn metadata() -> SecretMetadata {
    SecretMetadata::new("stripe-live", SecretType::ApiKey)
}

#[test]
fn every_recipient_decrypts_the_same_plaintext() {
    let members: Vec<(UserId, Keypair)> = (0..5).map(|i| member(&format!("user-{i}"))).collect();
    let recipients: Vec<Recipient> = members.iter().map(|(id, kp)| recipient(id, kp)).collect();

    let secret = encrypt_for_recipients(b"sk-test-123", &recipients, metadata()).unwrap();
    assert_eq!(secret.version, 1);
    assert_eq!(secret.wrapped_keys.len(), 5);

    for (id, kp) in &members {
        let plaintext = decrypt_for_self(&secret, id, &kp.secret).unwrap();
        assert_eq!(plaintext.as_slice(), b"sk-test-123");
    }
}

#[test]
fn wrap_set_matches_recipient_set() {
    let (a, kp_a) = member("a");
    let (b, kp_b) = member("b");
    let secret =
        encrypt_for_recipients(b"x", &[recipient(&a, &kp_a), recipient(&b, &kp_b)], metadata())
            .unwrap();

    let mut ids: Vec<&UserId> = secret.recipient_ids().collect();
    ids.sort();
    assert_eq!(ids, vec![&a, &b]);
}

#[test]
fn excluded_member_is_not_authorized() {
    let (owner, kp_owner) = member("owner");
    let (outsider, kp_outsider) = member("outsider");

    let secret = encrypt_for_recipients(b"x", &[recipient(&owner, &kp_owner)], metadata()).unwrap();
    let err = decrypt_for_self(&secret, &outsider, &kp_outsider.secret).unwrap_err();

    match err {
        CryptoError::NotAuthorized { user_id } => assert_eq!(user_id, "outsider"),
        other => panic!("expected NotAuthorized, got: {other:?}"),
    }
}

#[test]
fn stolen_wrap_does_not_open_with_another_key() {
    let (owner, kp_owner) = member("owner");
    let (_, kp_attacker) = member("attacker");

    let secret = encrypt_for_recipients(b"x", &[recipient(&owner, &kp_owner)], metadata()).unwrap();
    // Attacker claims the owner's user id but holds a different key.
    let err = decrypt_for_self(&secret, &owner, &kp_attacker.secret).unwrap_err();
    assert!(matches!(err, CryptoError::DecryptionFailed));
}

#[test]
fn every_ciphertext_byte_flip_is_detected() {
    let (owner, kp) = member("owner");
    let secret = encrypt_for_recipients(b"db://user:pw@host", &[recipient(&owner, &kp)], metadata())
        .unwrap();

    for i in 0..secret.ciphertext.len() {
        let mut tampered = secret.clone();
        tampered.ciphertext[i] ^= 0x01;
        let err = decrypt_for_self(&tampered, &owner, &kp.secret).unwrap_err();
        assert!(
            matches!(err, CryptoError::DecryptionFailed),
            "byte {i} flip must fail authentication"
        );
    }
}

#[test]
fn every_nonce_byte_flip_is_detected() {
    let (owner, kp) = member("owner");
    let secret = encrypt_for_recipients(b"payload", &[recipient(&owner, &kp)], metadata()).unwrap();

    for i in 0..secret.nonce.len() {
        let mut tampered = secret.clone();
        tampered.nonce[i] ^= 0x80;
        assert!(matches!(
            decrypt_for_self(&tampered, &owner, &kp.secret),
            Err(CryptoError::DecryptionFailed)
        ));
    }
}

#[test]
fn tampered_wrap_is_detected() {
    let (owner, kp) = member("owner");
    let mut secret =
        encrypt_for_recipients(b"payload", &[recipient(&owner, &kp)], metadata()).unwrap();
    secret.wrapped_keys[0].encrypted_key[0] ^= 0xFF;

    assert!(matches!(
        decrypt_for_self(&secret, &owner, &kp.secret),
        Err(CryptoError::DecryptionFailed)
    ));
}

#[test]
fn wraps_use_distinct_ephemeral_keys() {
    let members: Vec<(UserId, Keypair)> = (0..8).map(|i| member(&format!("m{i}"))).collect();
    let recipients: Vec<Recipient> = members.iter().map(|(id, kp)| recipient(id, kp)).collect();
    let secret = encrypt_for_recipients(b"x", &recipients, metadata()).unwrap();

    let mut senders: Vec<[u8; 32]> = secret
        .wrapped_keys
        .iter()
        .map(|wk| wk.ephemeral_sender_public_key)
        .collect();
    senders.sort();
    senders.dedup();
    assert_eq!(senders.len(), 8);
}

#[test]
fn empty_plaintext_roundtrips() {
    let (owner, kp) = member("owner");
    let secret = encrypt_for_recipients(b"", &[recipient(&owner, &kp)], metadata()).unwrap();
    assert!(decrypt_for_self(&secret, &owner, &kp.secret).unwrap().is_empty());
}

#[test]
fn wire_format_uses_api_field_names() {
    let (owner, kp) = member("owner");
    let secret = encrypt_for_recipients(b"x", &[recipient(&owner, &kp)], metadata()).unwrap();

    let json: serde_json::Value = serde_json::to_value(&secret).unwrap();
    assert!(json["encrypted_secret"].is_string());
    assert!(json["nonce"].is_string());
    assert_eq!(json["version"], 1);
    assert_eq!(json["metadata"]["type"], "api_key");

    let wrap = &json["encrypted_keys"][0];
    assert_eq!(wrap["user_id"], "owner");
    for field in ["encrypted_key", "nonce", "sender_public_key"] {
        assert!(wrap[field].is_string(), "{field} should be base64 text");
    }

    let parsed: EncryptedSecret = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, secret);
    assert_eq!(
        decrypt_for_self(&parsed, &owner, &kp.secret).unwrap().as_slice(),
        b"x"
    );
}

#[test]
fn wrong_length_nonce_is_rejected_at_parse_time() {
    let (owner, kp) = member("owner");
    let secret = encrypt_for_recipients(b"x", &[recipient(&owner, &kp)], metadata()).unwrap();

    let mut json = serde_json::to_value(&secret).unwrap();
    json["nonce"] = serde_json::Value::String(secrelo_crypto::encoding::encode([0u8; 12]));
    assert!(serde_json::from_value::<EncryptedSecret>(json).is_err());
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn encrypt_decrypt_always_roundtrips(
            plaintext in proptest::collection::vec(any::<u8>(), 0..512),
            count in 1usize..5,
        ) {
            let members: Vec<(UserId, Keypair)> =
                (0..count).map(|i| member(&format!("p{i}"))).collect();
            let recipients: Vec<Recipient> =
                members.iter().map(|(id, kp)| recipient(id, kp)).collect();

            let secret = encrypt_for_recipients(&plaintext, &recipients, metadata()).unwrap();
            for (id, kp) in &members {
                let recovered = decrypt_for_self(&secret, id, &kp.secret).unwrap();
                prop_assert_eq!(recovered.as_slice(), plaintext.as_slice());
            }
        }
    }
}

#[test]
fn payload_sealed_by_plain_secretbox_decrypts() {
    // Payload produced the way existing clients store it: crypto_secretbox
    // under the DEK, tag first, no associated data.
    let (me, kp) = member("me");
    let dek = generate_random_key();
    let nonce = [7u8; 24];
    let ciphertext = XSalsa20Poly1305::new(crypto_secretbox::Key::from_slice(dek.as_bytes()))
        .encrypt(crypto_secretbox::Nonce::from_slice(&nonce), b"sk-test-123".as_ref())
        .unwrap();

    let stored = EncryptedSecret {
        ciphertext,
        nonce,
        wrapped_keys: vec![seal_dek(&dek, &me, &kp.public).unwrap()],
        version: 1,
        metadata: metadata(),
    };

    let plaintext = decrypt_for_self(&stored, &me, &kp.secret).unwrap();
    assert_eq!(plaintext.as_slice(), b"sk-test-123");
}

#[test]
fn new_payloads_open_with_plain_secretbox() {
    let (me, kp) = member("me");
    let secret = encrypt_for_recipients(b"sk-test-123", &[recipient(&me, &kp)], metadata()).unwrap();
    let dek = secrelo_crypto::envelope::recover_dek(&secret, &me, &kp.secret).unwrap();

    let opened = XSalsa20Poly1305::new(crypto_secretbox::Key::from_slice(dek.as_bytes()))
        .decrypt(
            crypto_secretbox::Nonce::from_slice(&secret.nonce),
            secret.ciphertext.as_ref(),
        )
        .unwrap();
    assert_eq!(opened, b"sk-test-123");
}

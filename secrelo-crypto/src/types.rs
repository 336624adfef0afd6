//! Shared record types exchanged with the secrets and membership APIs.

use crate::encoding::b64_public_key;
use chrono::{DateTime, Utc};
use crypto_box::PublicKey;
use serde::{Deserialize, Serialize};

/// Opaque user identifier as issued by the server.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A member allowed to read a secret, as reported by the membership API.
///
/// The recipient list handed to the encryption core is treated as ground
/// truth; the core does not check membership on its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: UserId,
    #[serde(with = "b64_public_key")]
    pub public_key: PublicKey,
}

impl Recipient {
    pub fn new(user_id: impl Into<UserId>, public_key: PublicKey) -> Self {
        Self {
            user_id: user_id.into(),
            public_key,
        }
    }
}

/// Kind of credential stored in a secret.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    ApiKey,
    OauthToken,
    ClientSecret,
    DbConnection,
    SshKey,
    WebhookSecret,
    CloudKeypair,
    JwtKey,
    #[default]
    CustomSecret,
}

impl SecretType {
    /// Human-readable label for display.
    pub fn label(&self) -> &'static str {
        match self {
            SecretType::ApiKey => "API Key",
            SecretType::OauthToken => "OAuth Token",
            SecretType::ClientSecret => "Client Secret",
            SecretType::DbConnection => "Database Connection String",
            SecretType::SshKey => "SSH Private Key",
            SecretType::WebhookSecret => "Webhook Secret",
            SecretType::CloudKeypair => "Cloud Storage Keypair",
            SecretType::JwtKey => "JWT Signing Key",
            SecretType::CustomSecret => "Custom Secret",
        }
    }
}

/// Plaintext metadata stored beside a secret's ciphertext.
///
/// Editing any of these fields never re-keys the secret.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub secret_type: SecretType,
    /// Auto-kill date after which the secret should no longer be used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SecretMetadata {
    pub fn new(name: impl Into<String>, secret_type: SecretType) -> Self {
        Self {
            name: name.into(),
            secret_type,
            ..Self::default()
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

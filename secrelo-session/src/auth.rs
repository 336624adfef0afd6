//! Auth collaborator model.
//!
//! The HTTP auth layer is external; this module models only what the
//! session needs from it: the login payload, the token pair, and a separate
//! idle window for the auth session.

use secrelo_crypto::encoding::b64_public_key;
use secrelo_crypto::{EncryptedPrivateKeyEnvelope, PublicKey, UserId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The user's encrypted keypair as returned on login or registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionBundle {
    #[serde(flatten)]
    pub envelope: EncryptedPrivateKeyEnvelope,
    #[serde(with = "b64_public_key")]
    pub public_key: PublicKey,
}

/// Successful login or registration response.
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: AuthUser,
    #[serde(default)]
    pub encryption: Option<EncryptionBundle>,
}

impl LoginResponse {
    pub fn tokens(&self) -> AuthTokens {
        AuthTokens {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

impl std::fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("user", &self.user)
            .field("encryption", &self.encryption.is_some())
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthTokens([REDACTED])")
    }
}

/// Auth state persisted in durable (cross-tab) storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedAuth {
    pub tokens: AuthTokens,
    pub user: AuthUser,
}

/// Token-level session with its own idle window.
#[derive(Debug)]
pub struct AuthSession {
    current: Option<PersistedAuth>,
    last_activity: Instant,
    idle_timeout: Duration,
}

impl AuthSession {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            current: None,
            last_activity: Instant::now(),
            idle_timeout,
        }
    }

    pub fn establish(&mut self, tokens: AuthTokens, user: AuthUser) {
        debug!("auth session established for {}", user.id);
        self.current = Some(PersistedAuth { tokens, user });
        self.last_activity = Instant::now();
    }

    /// Swaps in a refreshed token pair. Ignored when no session is active.
    pub fn refresh_tokens(&mut self, tokens: AuthTokens) {
        if let Some(current) = self.current.as_mut() {
            current.tokens = tokens;
        }
    }

    /// Ends the session. Returns `false` if none was active.
    pub fn end(&mut self) -> bool {
        let ended = self.current.take().is_some();
        if ended {
            debug!("auth session ended");
        }
        ended
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.current.as_ref().map(|c| &c.user)
    }

    pub fn tokens(&self) -> Option<&AuthTokens> {
        self.current.as_ref().map(|c| &c.tokens)
    }

    /// Snapshot for durable storage.
    pub fn persisted(&self) -> Option<PersistedAuth> {
        self.current.clone()
    }

    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// True when active and idle for longer than the window.
    pub fn is_idle_expired(&self) -> bool {
        self.is_active() && self.last_activity.elapsed() > self.idle_timeout
    }
}

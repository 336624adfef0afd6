//! Session lifecycle for the Secrelo encryption core.
//!
//! - [`SessionVault`] owns the unwrapped identity keypair, mirrors it into an
//!   encrypted tab-scoped backup, and locks itself after an idle timeout.
//! - [`DecryptionWorker`] runs the Argon2id unwrap on a dedicated thread.
//! - [`ClientSession`] ties the vault to the auth session and to sibling
//!   tabs through a [`SessionBus`], keeping both idle mechanisms in step.
//!
//! Everything here is local. Callers fetch envelopes, public keys and
//! ciphertexts from the API and pass them in.

pub mod auth;
mod backup;
pub mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod store;
pub mod vault;
pub mod worker;

pub use auth::{AuthSession, AuthTokens, AuthUser, EncryptionBundle, LoginResponse, PersistedAuth};
pub use bus::{SessionBus, SessionSignal};
pub use client::ClientSession;
pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use store::{MemorySessionStore, SessionStore, KEY_BACKUP_SLOT, SESSION_KEY_SLOT};
pub use vault::{LockReason, SessionVault, VaultEvent, VaultState};
pub use worker::{DecryptionWorker, UnlockRequest};

//! Client session: wires the vault, auth session, unlock worker and
//! cross-tab bus together for one tab.
//!
//! Synchronization rule between the two idle mechanisms:
//!
//! - A logout in this tab or a sibling tab empties the vault.
//! - An idle timeout on either side (auth or vault) leaves the vault
//!   `Locked` with a `SessionTimeout` event. The key backup is deleted, so
//!   the keys cannot come back without the password; the auth session is
//!   ended and the logout is broadcast so no tab keeps a half-valid session.
//! - On start-up, a restored backup without a live auth session is
//!   discarded, and a live auth session without restorable keys is ended.
//!
//! Net invariant: outside of an in-flight login, auth is live exactly when
//! the vault is unlocked.

use crate::auth::{AuthSession, AuthUser, LoginResponse, PersistedAuth};
use crate::bus::{SessionBus, SessionSignal};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::store::SessionStore;
use crate::vault::{LockReason, SessionVault, VaultEvent, VaultState};
use crate::worker::{DecryptionWorker, UnlockRequest};
use secrelo_crypto::{
    apply_edit, encrypt_for_recipients, grant, revoke, EditOutcome, EncryptedSecret, Reader,
    Recipient, SecretEdit, SecretMetadata, UserId, WrappedKey,
};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// One tab's view of the encrypted session.
pub struct ClientSession {
    tab_id: Uuid,
    vault: Arc<SessionVault>,
    auth: Arc<RwLock<AuthSession>>,
    worker: DecryptionWorker,
    bus: SessionBus,
    config: SessionConfig,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ClientSession {
    /// Creates a session over the tab's `store`, joined to `bus`.
    ///
    /// Validates `config` and starts the unlock worker thread.
    pub fn new(
        store: Arc<dyn SessionStore>,
        bus: SessionBus,
        config: SessionConfig,
    ) -> SessionResult<Self> {
        config.validate()?;
        let worker = DecryptionWorker::spawn(config.worker_queue_depth)?;

        Ok(Self {
            tab_id: Uuid::new_v4(),
            vault: Arc::new(SessionVault::new(store, &config)),
            auth: Arc::new(RwLock::new(AuthSession::new(config.auth_idle_timeout()))),
            worker,
            bus,
            config,
            supervisor: Mutex::new(None),
        })
    }

    pub fn tab_id(&self) -> Uuid {
        self.tab_id
    }

    pub fn vault(&self) -> &Arc<SessionVault> {
        &self.vault
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.vault.subscribe()
    }

    /// Application start-up.
    ///
    /// `persisted` is the auth state found in durable storage, if any. Restores
    /// the key backup, applies the start-up synchronization rule and starts
    /// the background monitors. Returns the resulting vault state.
    pub async fn init(&self, persisted: Option<PersistedAuth>) -> SessionResult<VaultState> {
        if let Some(PersistedAuth { tokens, user }) = persisted {
            self.auth.write().await.establish(tokens, user);
        }

        let restored = self.vault.init().await;
        let auth_live = self.auth.read().await.is_active();

        let outcome = match restored {
            Ok(VaultState::Unlocked) if !auth_live => {
                warn!("restored keys without a live auth session, discarding");
                self.vault.lock(LockReason::Logout).await;
                Ok(VaultState::Empty)
            }
            Ok(VaultState::Unlocked) => Ok(VaultState::Unlocked),
            Ok(state) => {
                if self.auth.write().await.end() {
                    info!("auth session has no restorable keys, re-login required");
                }
                Ok(state)
            }
            Err(e) => {
                self.auth.write().await.end();
                Err(e)
            }
        };

        self.vault.start_idle_monitor();
        self.start_supervisor();
        outcome
    }

    /// Completes a login: unwraps the private key off-thread, fills the
    /// vault, then establishes the auth session.
    ///
    /// Any keys already in the vault are cleared first. On failure neither
    /// the vault nor the auth session is populated.
    pub async fn login(
        &self,
        response: LoginResponse,
        password: Zeroizing<String>,
    ) -> SessionResult<AuthUser> {
        let tokens = response.tokens();
        let LoginResponse {
            user, encryption, ..
        } = response;
        let bundle = encryption.ok_or(SessionError::NoEncryptionKeys)?;

        self.vault.lock(LockReason::Logout).await;
        self.auth.write().await.end();
        self.vault.mark_unlocking().await;

        let unwrapped = self
            .worker
            .unwrap_private_key(UnlockRequest {
                envelope: bundle.envelope,
                public_key: bundle.public_key,
                password,
            })
            .await;

        let keypair = match unwrapped {
            Ok(keypair) => keypair,
            Err(e) => {
                self.vault.fail_unlock().await;
                return Err(e);
            }
        };
        self.vault.complete_unlock(keypair).await?;

        self.auth.write().await.establish(tokens, user.clone());
        info!("logged in as {}", user.id);
        Ok(user)
    }

    /// Ends the session in this tab and tells sibling tabs to do the same.
    pub async fn logout(&self) {
        end_session(&self.vault, &self.auth).await;
        self.bus.publish(SessionSignal::LoggedOut {
            origin: self.tab_id,
        });
        info!("logged out");
    }

    /// Records a user interaction for both idle windows.
    pub async fn record_activity(&self) {
        self.vault.record_activity().await;
        self.auth.write().await.record_activity();
    }

    /// Auth state to persist in durable storage, if logged in.
    pub async fn persisted_auth(&self) -> Option<PersistedAuth> {
        self.auth.read().await.persisted()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.auth.read().await.is_active()
    }

    /// The logged-in user's id.
    pub async fn current_user(&self) -> SessionResult<UserId> {
        self.auth
            .read()
            .await
            .user()
            .map(|u| u.id.clone())
            .ok_or(SessionError::AuthRequired)
    }

    // ========================================================================
    // Secret operations
    // ========================================================================

    /// Encrypts a new secret for `recipients`. Needs a live auth session
    /// but no private key.
    pub async fn encrypt(
        &self,
        plaintext: &[u8],
        recipients: &[Recipient],
        metadata: SecretMetadata,
    ) -> SessionResult<EncryptedSecret> {
        self.current_user().await?;
        Ok(encrypt_for_recipients(plaintext, recipients, metadata)?)
    }

    pub async fn decrypt(&self, secret: &EncryptedSecret) -> SessionResult<Zeroizing<Vec<u8>>> {
        let me = self.current_user().await?;
        self.vault.decrypt_secret(secret, &me).await
    }

    /// Adds a wrap for `new_member` under the existing DEK.
    pub async fn grant(
        &self,
        secret: &mut EncryptedSecret,
        new_member: &Recipient,
    ) -> SessionResult<WrappedKey> {
        let me = self.current_user().await?;
        let wrapped = self
            .vault
            .with_keypair(|kp| grant(secret, Reader::new(&me, &kp.secret), new_member))
            .await??;
        Ok(wrapped)
    }

    /// Re-keys `secret` for `members` without `revoked`.
    pub async fn revoke(
        &self,
        secret: &EncryptedSecret,
        revoked: &UserId,
        members: &[Recipient],
    ) -> SessionResult<EncryptedSecret> {
        let me = self.current_user().await?;
        let rekeyed = self
            .vault
            .with_keypair(|kp| revoke(secret, Reader::new(&me, &kp.secret), revoked, members))
            .await??;
        Ok(rekeyed)
    }

    /// Applies an edit, rotating only when the value changed.
    pub async fn edit(
        &self,
        secret: &EncryptedSecret,
        edit: SecretEdit,
        members: &[Recipient],
    ) -> SessionResult<(EncryptedSecret, EditOutcome)> {
        let me = self.current_user().await?;
        let edited = self
            .vault
            .with_keypair(|kp| apply_edit(secret, Reader::new(&me, &kp.secret), edit, members))
            .await??;
        Ok(edited)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Application shutdown or page unload. Stops background work and drops
    /// in-memory keys; the tab-scoped backup and the auth state survive.
    pub async fn teardown(&self) {
        if let Some(handle) = self.supervisor_slot().take() {
            handle.abort();
        }
        self.vault.teardown().await;
        self.worker.shutdown();
        debug!("client session torn down");
    }

    fn start_supervisor(&self) {
        let supervisor = Supervisor {
            tab_id: self.tab_id,
            vault: Arc::clone(&self.vault),
            auth: Arc::clone(&self.auth),
            bus: self.bus.clone(),
            period: self.config.idle_check_interval(),
        };
        // Subscribe before spawning so no signal is missed.
        let vault_events = self.vault.subscribe();
        let signals = self.bus.subscribe();
        let handle = tokio::spawn(supervisor.run(vault_events, signals));

        if let Some(previous) = self.supervisor_slot().replace(handle) {
            previous.abort();
        }
    }

    fn supervisor_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.supervisor.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor_slot().take() {
            handle.abort();
        }
        self.vault.stop_idle_monitor();
    }
}

/// Ends the auth session and empties the vault.
async fn end_session(vault: &SessionVault, auth: &RwLock<AuthSession>) {
    auth.write().await.end();
    vault.lock(LockReason::Logout).await;
}

/// Background task keeping the auth session, the vault and sibling tabs
/// consistent.
struct Supervisor {
    tab_id: Uuid,
    vault: Arc<SessionVault>,
    auth: Arc<RwLock<AuthSession>>,
    bus: SessionBus,
    period: std::time::Duration,
}

impl Supervisor {
    async fn run(
        self,
        mut vault_events: broadcast::Receiver<VaultEvent>,
        mut signals: broadcast::Receiver<SessionSignal>,
    ) {
        let mut ticker = tokio::time::interval(self.period);
        // Skip first immediate tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = self.auth.read().await.is_idle_expired();
                    if expired {
                        info!("auth session idle timeout");
                        self.auth.write().await.end();
                        self.vault.lock(LockReason::IdleTimeout).await;
                        self.broadcast_logout();
                    }
                }
                event = vault_events.recv() => match event {
                    Ok(VaultEvent::SessionTimeout) => {
                        // Vault stays Locked; only the auth side follows.
                        if self.auth.write().await.end() {
                            info!("vault idle lock, ending auth session");
                            self.broadcast_logout();
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("missed {n} vault events");
                        self.reconcile_after_lag().await;
                    }
                    Err(RecvError::Closed) => break,
                },
                signal = signals.recv() => match signal {
                    Ok(SessionSignal::LoggedOut { origin }) if origin != self.tab_id => {
                        info!("sibling tab {origin} logged out, clearing session");
                        end_session(&self.vault, &self.auth).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        // A dropped logout must not leave keys behind.
                        warn!("missed {n} session signals, clearing session");
                        end_session(&self.vault, &self.auth).await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("session supervisor stopped");
    }

    /// A missed `SessionTimeout` must not leave auth live over a keyless
    /// vault. An in-flight unlock is left alone.
    async fn reconcile_after_lag(&self) {
        let state = self.vault.state().await;
        if matches!(state, VaultState::Unlocked | VaultState::Unlocking) {
            return;
        }
        if self.auth.write().await.end() {
            info!("vault is {state:?} after missed events, ending auth session");
            self.broadcast_logout();
        }
    }

    fn broadcast_logout(&self) {
        self.bus.publish(SessionSignal::LoggedOut {
            origin: self.tab_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthTokens;
    use crate::store::MemorySessionStore;
    use secrelo_crypto::generate_keypair;
    use std::time::Duration;

    fn user() -> AuthUser {
        AuthUser {
            id: UserId::new("u-1"),
            email: "dev@example.com".to_string(),
            name: None,
        }
    }

    async fn supervisor_with_live_auth(bus: &SessionBus) -> Supervisor {
        let config = SessionConfig::default();
        let vault = Arc::new(SessionVault::new(Arc::new(MemorySessionStore::new()), &config));
        vault.init().await.unwrap();

        let mut auth = AuthSession::new(config.auth_idle_timeout());
        auth.establish(
            AuthTokens {
                access_token: "a".to_string(),
                refresh_token: "r".to_string(),
            },
            user(),
        );

        Supervisor {
            tab_id: Uuid::new_v4(),
            vault,
            auth: Arc::new(RwLock::new(auth)),
            bus: bus.clone(),
            period: config.idle_check_interval(),
        }
    }

    /// A vault-event receiver that has already missed one event.
    fn lagged_events() -> (broadcast::Sender<VaultEvent>, broadcast::Receiver<VaultEvent>) {
        let (tx, rx) = broadcast::channel(1);
        tx.send(VaultEvent::SessionTimeout).unwrap();
        tx.send(VaultEvent::Cleared).unwrap();
        (tx, rx)
    }

    #[tokio::test]
    async fn missed_timeout_event_still_ends_auth() {
        let bus = SessionBus::new();
        let supervisor = supervisor_with_live_auth(&bus).await;
        supervisor.vault.set_keys(generate_keypair()).await.unwrap();
        supervisor.vault.lock(LockReason::IdleTimeout).await;

        let auth = Arc::clone(&supervisor.auth);
        let tab_id = supervisor.tab_id;
        let mut siblings = bus.subscribe();
        let (_tx, events) = lagged_events();
        let handle = tokio::spawn(supervisor.run(events, bus.subscribe()));

        let signal = tokio::time::timeout(Duration::from_secs(5), siblings.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal.origin(), tab_id);
        assert!(!auth.read().await.is_active());
        handle.abort();
    }

    #[tokio::test]
    async fn missed_events_leave_in_flight_unlock_alone() {
        let bus = SessionBus::new();
        let supervisor = supervisor_with_live_auth(&bus).await;
        supervisor.vault.mark_unlocking().await;

        let auth = Arc::clone(&supervisor.auth);
        let vault = Arc::clone(&supervisor.vault);
        let (_tx, events) = lagged_events();
        let handle = tokio::spawn(supervisor.run(events, bus.subscribe()));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert!(auth.read().await.is_active());
        assert_eq!(vault.state().await, VaultState::Unlocking);
        handle.abort();
    }
}

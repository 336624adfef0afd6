//! Session key vault.
//!
//! Holds the unwrapped identity keypair for the running session and is the
//! only long-lived owner of private key material. Other components borrow
//! the key for a single operation through [`SessionVault::with_keypair`].
//!
//! State machine:
//!
//! ```text
//! Empty -> Unlocking -> Unlocked -> Locked (idle timeout)
//!                                -> Empty  (logout)
//! ```
//!
//! Entering `Unlocked` writes an encrypted backup to tab-scoped storage so a
//! reload can restore the keys. Leaving it wipes the in-memory keypair and
//! deletes the backup.

use crate::backup;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::store::SessionStore;
use secrelo_crypto::{
    decrypt_for_self, DerivedKey, EncryptedSecret, Keypair, PublicKey, UserId,
};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

const EVENT_CAPACITY: usize = 16;

// ============================================================================
// State and events
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VaultState {
    /// No keys in memory and no usable backup.
    Empty,
    /// Password unwrap in progress.
    Unlocking,
    /// Keypair held in memory.
    Unlocked,
    /// Keys wiped after the idle timeout.
    Locked,
}

/// Why the vault is being locked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockReason {
    /// Idle timeout expired. Ends in [`VaultState::Locked`].
    IdleTimeout,
    /// Explicit or propagated logout. Ends in [`VaultState::Empty`].
    Logout,
}

/// Notifications for the surrounding application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VaultEvent {
    /// Keys were placed in the vault, by unlock or by backup restore.
    Unlocked { fingerprint: String },
    /// The idle timeout expired and the keys were wiped. The UI should
    /// prompt for re-authentication.
    SessionTimeout,
    /// Keys were wiped by logout.
    Cleared,
}

struct VaultInner {
    state: VaultState,
    /// State to fall back to if an unlock attempt fails.
    before_unlock: VaultState,
    keypair: Option<Keypair>,
    session_key: Option<DerivedKey>,
    last_activity: Instant,
}

// ============================================================================
// SessionVault
// ============================================================================

/// The in-memory key vault for one client session (one tab).
pub struct SessionVault {
    inner: RwLock<VaultInner>,
    store: Arc<dyn SessionStore>,
    events: broadcast::Sender<VaultEvent>,
    idle_timeout: Duration,
    check_interval: Duration,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl SessionVault {
    /// Creates an empty vault backed by `store`. Call [`init`](Self::init)
    /// before use to restore any backup.
    pub fn new(store: Arc<dyn SessionStore>, config: &SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: RwLock::new(VaultInner {
                state: VaultState::Empty,
                before_unlock: VaultState::Empty,
                keypair: None,
                session_key: None,
                last_activity: Instant::now(),
            }),
            store,
            events,
            idle_timeout: config.vault_idle_timeout(),
            check_interval: config.idle_check_interval(),
            monitor: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }

    /// Loads the tab's session key and restores the keypair from backup.
    ///
    /// Returns the resulting state. A backup that cannot be opened is
    /// deleted, the vault stays `Empty`, and
    /// [`SessionError::SessionRestoreFailed`] is returned.
    pub async fn init(&self) -> SessionResult<VaultState> {
        let session_key = backup::load_or_create_session_key(self.store.as_ref());
        let restored = backup::read_backup(self.store.as_ref(), &session_key);

        let mut inner = self.inner.write().await;
        inner.session_key = Some(session_key);

        match restored {
            Ok(Some(keypair)) => {
                let fingerprint = keypair.fingerprint();
                inner.keypair = Some(keypair);
                inner.state = VaultState::Unlocked;
                inner.last_activity = Instant::now();
                info!("vault restored from session backup");
                self.emit(VaultEvent::Unlocked { fingerprint });
                Ok(VaultState::Unlocked)
            }
            Ok(None) => {
                debug!("no session backup to restore");
                Ok(inner.state)
            }
            Err(e) => {
                warn!("discarding unusable session backup: {e}");
                backup::remove_backup(self.store.as_ref());
                inner.keypair = None;
                inner.state = VaultState::Empty;
                Err(e)
            }
        }
    }

    pub async fn state(&self) -> VaultState {
        self.inner.read().await.state
    }

    pub async fn is_unlocked(&self) -> bool {
        self.state().await == VaultState::Unlocked
    }

    /// Public key of the held keypair, if unlocked.
    pub async fn public_key(&self) -> Option<PublicKey> {
        self.inner
            .read()
            .await
            .keypair
            .as_ref()
            .map(|kp| kp.public.clone())
    }

    /// Marks an unlock attempt as in progress. No-op when already unlocked.
    pub async fn mark_unlocking(&self) {
        let mut inner = self.inner.write().await;
        if inner.state != VaultState::Unlocked && inner.state != VaultState::Unlocking {
            inner.before_unlock = inner.state;
            inner.state = VaultState::Unlocking;
            debug!("vault unlocking");
        }
    }

    /// Abandons an in-progress unlock, returning to the prior state.
    pub async fn fail_unlock(&self) {
        let mut inner = self.inner.write().await;
        if inner.state == VaultState::Unlocking {
            inner.state = inner.before_unlock;
            debug!("vault unlock abandoned, back to {:?}", inner.state);
        }
    }

    /// Takes ownership of an unwrapped keypair and enters `Unlocked`.
    ///
    /// Writes the encrypted backup before the keys become usable. If the
    /// backup cannot be written the keypair is dropped and the error
    /// returned.
    pub async fn set_keys(&self, keypair: Keypair) -> SessionResult<()> {
        let mut inner = self.inner.write().await;
        self.install(&mut inner, keypair)
    }

    /// Finishes an unlock started with [`mark_unlocking`](Self::mark_unlocking).
    ///
    /// If the vault left `Unlocking` in the meantime (a logout raced the
    /// unwrap), the keypair is discarded and [`SessionError::VaultLocked`]
    /// returned.
    pub async fn complete_unlock(&self, keypair: Keypair) -> SessionResult<()> {
        let mut inner = self.inner.write().await;
        if inner.state != VaultState::Unlocking {
            debug!("discarding unwrapped keys, unlock was cancelled");
            return Err(SessionError::VaultLocked);
        }
        self.install(&mut inner, keypair)
    }

    fn install(&self, inner: &mut VaultInner, keypair: Keypair) -> SessionResult<()> {
        let session_key = match inner.session_key.take() {
            Some(key) => key,
            None => backup::load_or_create_session_key(self.store.as_ref()),
        };
        let written = backup::write_backup(self.store.as_ref(), &session_key, &keypair);
        inner.session_key = Some(session_key);
        if let Err(e) = written {
            inner.state = inner.before_unlock;
            return Err(e);
        }

        let fingerprint = keypair.fingerprint();
        inner.keypair = Some(keypair);
        inner.state = VaultState::Unlocked;
        inner.last_activity = Instant::now();

        info!("vault unlocked");
        self.emit(VaultEvent::Unlocked { fingerprint });
        Ok(())
    }

    /// Wipes the keypair and the backup.
    ///
    /// Returns `false` if there was nothing to lock.
    pub async fn lock(&self, reason: LockReason) -> bool {
        let mut inner = self.inner.write().await;
        self.lock_inner(&mut inner, reason)
    }

    fn lock_inner(&self, inner: &mut VaultInner, reason: LockReason) -> bool {
        let had_keys = inner.keypair.is_some() || inner.state == VaultState::Unlocking;
        // Keypair's secret key zeroizes on drop.
        inner.keypair = None;
        backup::remove_backup(self.store.as_ref());

        let next = match reason {
            LockReason::IdleTimeout => VaultState::Locked,
            LockReason::Logout => VaultState::Empty,
        };
        let changed = had_keys || inner.state != next;
        inner.state = next;
        inner.before_unlock = next;

        if changed {
            match reason {
                LockReason::IdleTimeout => {
                    info!("vault locked on idle timeout");
                    self.emit(VaultEvent::SessionTimeout);
                }
                LockReason::Logout => {
                    info!("vault cleared on logout");
                    self.emit(VaultEvent::Cleared);
                }
            }
        }
        changed
    }

    /// Refreshes the idle timestamp. Called on user interaction.
    pub async fn record_activity(&self) {
        self.inner.write().await.last_activity = Instant::now();
    }

    /// Time since the last recorded activity.
    pub async fn idle_for(&self) -> Duration {
        self.inner.read().await.last_activity.elapsed()
    }

    /// Locks the vault if it has been idle longer than the timeout.
    ///
    /// Only ever moves `Unlocked -> Locked`. Returns whether it locked.
    pub async fn check_idle(&self) -> bool {
        let mut inner = self.inner.write().await;
        if inner.state != VaultState::Unlocked {
            return false;
        }
        if inner.last_activity.elapsed() > self.idle_timeout {
            self.lock_inner(&mut inner, LockReason::IdleTimeout)
        } else {
            false
        }
    }

    /// Runs `f` with the held keypair.
    ///
    /// The keypair is only borrowed for the call; fails with
    /// [`SessionError::VaultLocked`] unless the vault is unlocked.
    pub async fn with_keypair<R>(&self, f: impl FnOnce(&Keypair) -> R) -> SessionResult<R> {
        let inner = self.inner.read().await;
        match (&inner.state, inner.keypair.as_ref()) {
            (VaultState::Unlocked, Some(keypair)) => Ok(f(keypair)),
            _ => Err(SessionError::VaultLocked),
        }
    }

    /// Decrypts a secret for `user_id` with the held private key.
    pub async fn decrypt_secret(
        &self,
        secret: &EncryptedSecret,
        user_id: &UserId,
    ) -> SessionResult<Zeroizing<Vec<u8>>> {
        let plaintext = self
            .with_keypair(|kp| decrypt_for_self(secret, user_id, &kp.secret))
            .await??;
        Ok(plaintext)
    }

    // ========================================================================
    // Idle monitor
    // ========================================================================

    /// Starts the recurring idle check. Replaces any running monitor.
    ///
    /// The task holds only a weak reference, so dropping the last `Arc`
    /// ends it.
    pub fn start_idle_monitor(self: &Arc<Self>) {
        let vault: Weak<Self> = Arc::downgrade(self);
        let period = self.check_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // Skip first immediate tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(vault) = vault.upgrade() else {
                    break;
                };
                vault.check_idle().await;
            }
        });

        if let Some(previous) = self.monitor_slot().replace(handle) {
            previous.abort();
        }
        debug!("vault idle monitor started ({}s interval)", period.as_secs());
    }

    pub fn stop_idle_monitor(&self) {
        if let Some(handle) = self.monitor_slot().take() {
            handle.abort();
            debug!("vault idle monitor stopped");
        }
    }

    /// Ends this session's use of the vault.
    ///
    /// Stops the idle monitor and drops in-memory keys. The backup is kept so
    /// a reload of the same tab can restore it.
    pub async fn teardown(&self) {
        self.stop_idle_monitor();
        let mut inner = self.inner.write().await;
        inner.keypair = None;
        inner.state = VaultState::Empty;
        debug!("vault torn down");
    }

    fn monitor_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.monitor.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: VaultEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Drop for SessionVault {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor_slot().take() {
            handle.abort();
        }
    }
}

//! Session configuration.

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts and worker sizing for a client session.
///
/// The vault idle lock and the auth-token idle window are separate values;
/// whichever expires first ends both (see `ClientSession`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which decrypted keys are wiped (seconds).
    pub vault_idle_timeout_secs: u64,

    /// How often the idle checkers run (seconds).
    pub idle_check_interval_secs: u64,

    /// Idle time after which the auth session ends (seconds).
    pub auth_idle_timeout_secs: u64,

    /// Pending unlock requests the background worker will queue.
    pub worker_queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            vault_idle_timeout_secs: 30 * 60,
            idle_check_interval_secs: 60,
            auth_idle_timeout_secs: 5 * 60,
            worker_queue_depth: 4,
        }
    }
}

impl SessionConfig {
    pub fn vault_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.vault_idle_timeout_secs)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs)
    }

    pub fn auth_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_idle_timeout_secs)
    }

    /// Rejects zero values and a check interval longer than either timeout.
    pub fn validate(&self) -> SessionResult<()> {
        if self.vault_idle_timeout_secs == 0
            || self.auth_idle_timeout_secs == 0
            || self.idle_check_interval_secs == 0
        {
            return Err(SessionError::Config(
                "timeouts and check interval must be non-zero".to_string(),
            ));
        }
        if self.worker_queue_depth == 0 {
            return Err(SessionError::Config(
                "worker queue depth must be non-zero".to_string(),
            ));
        }
        let shortest = self.vault_idle_timeout_secs.min(self.auth_idle_timeout_secs);
        if self.idle_check_interval_secs > shortest {
            return Err(SessionError::Config(format!(
                "idle check interval {}s exceeds the shortest timeout {}s",
                self.idle_check_interval_secs, shortest
            )));
        }
        Ok(())
    }
}

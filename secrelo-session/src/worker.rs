//! Background unlock worker.
//!
//! Argon2id is deliberately slow, so the password unwrap runs on a dedicated
//! OS thread. The password moves into the worker with the request and is
//! wiped there; the raw private key moves back exactly once over a oneshot
//! channel and is handed straight to the caller.

use crate::error::{SessionError, SessionResult};
use secrelo_crypto::{
    keypair_from_unwrapped, unwrap_private_key_bytes, CryptoResult, EncryptedPrivateKeyEnvelope,
    Keypair, PublicKey, KEY_SIZE,
};
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use zeroize::Zeroizing;

const THREAD_NAME: &str = "secrelo-unlock";

/// Everything needed to unwrap one private key.
pub struct UnlockRequest {
    pub envelope: EncryptedPrivateKeyEnvelope,
    /// Server-held public key the unwrapped private key must match.
    pub public_key: PublicKey,
    pub password: Zeroizing<String>,
}

impl std::fmt::Debug for UnlockRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockRequest")
            .field("kdf_params", &self.envelope.kdf_params())
            .field("password", &"[REDACTED]")
            .finish()
    }
}

struct Job {
    envelope: EncryptedPrivateKeyEnvelope,
    password: Zeroizing<String>,
    reply: oneshot::Sender<CryptoResult<Zeroizing<[u8; KEY_SIZE]>>>,
}

/// Handle to the unlock thread.
///
/// Requests are processed one at a time in arrival order. Dropping the
/// handle (or calling [`shutdown`](Self::shutdown)) lets the thread finish
/// its current job and exit.
pub struct DecryptionWorker {
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
}

impl DecryptionWorker {
    /// Starts the worker thread.
    ///
    /// Fails with [`SessionError::KeyDerivationUnavailable`] if the OS
    /// refuses to create the thread.
    pub fn spawn(queue_depth: usize) -> SessionResult<Self> {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));

        std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run(rx))
            .map_err(|e| SessionError::KeyDerivationUnavailable(e.to_string()))?;

        info!("unlock worker spawned");
        Ok(Self {
            jobs: Mutex::new(Some(tx)),
        })
    }

    /// Unwraps the private key off-thread and rebuilds the keypair.
    ///
    /// Wrong password surfaces as `Crypto(InvalidPassword)`. A worker that
    /// is shut down or died surfaces as `KeyDerivationUnavailable`.
    pub async fn unwrap_private_key(&self, request: UnlockRequest) -> SessionResult<Keypair> {
        let jobs = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| {
                SessionError::KeyDerivationUnavailable("unlock worker is shut down".to_string())
            })?;

        let UnlockRequest {
            envelope,
            public_key,
            password,
        } = request;
        let (reply, response) = oneshot::channel();

        jobs.send(Job {
            envelope,
            password,
            reply,
        })
        .await
        .map_err(|_| SessionError::KeyDerivationUnavailable("unlock worker is not running".to_string()))?;

        let secret = response.await.map_err(|_| {
            SessionError::KeyDerivationUnavailable("unlock worker stopped mid-request".to_string())
        })??;

        Ok(keypair_from_unwrapped(secret, &public_key)?)
    }

    /// Stops accepting requests. Queued jobs still run.
    pub fn shutdown(&self) {
        if self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
        {
            info!("unlock worker shutting down");
        }
    }

    pub fn is_running(&self) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

fn run(mut jobs: mpsc::Receiver<Job>) {
    debug!("unlock worker started");
    while let Some(Job {
        envelope,
        password,
        reply,
    }) = jobs.blocking_recv()
    {
        let result = unwrap_private_key_bytes(&envelope, &password);
        drop(password);
        if reply.send(result).is_err() {
            // Requester gave up; the returned key bytes are wiped on drop.
            debug!("unlock result discarded, requester went away");
        }
    }
    debug!("unlock worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrelo_crypto::{generate_keypair, seal_private_key, CryptoError, KdfParams};

    const FAST: KdfParams = KdfParams {
        ops_limit: 1,
        mem_limit: 64 * 1024,
    };

    #[tokio::test]
    async fn shutdown_rejects_new_requests() {
        let worker = DecryptionWorker::spawn(1).unwrap();
        assert!(worker.is_running());
        worker.shutdown();
        assert!(!worker.is_running());

        let kp = generate_keypair();
        let request = UnlockRequest {
            envelope: seal_private_key(&kp, "pw", &FAST).unwrap(),
            public_key: kp.public.clone(),
            password: Zeroizing::new("pw".to_string()),
        };
        let err = worker.unwrap_private_key(request).await.unwrap_err();
        assert!(matches!(err, SessionError::KeyDerivationUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn wrong_password_is_not_retryable() {
        let worker = DecryptionWorker::spawn(1).unwrap();
        let kp = generate_keypair();
        let request = UnlockRequest {
            envelope: seal_private_key(&kp, "pw", &FAST).unwrap(),
            public_key: kp.public.clone(),
            password: Zeroizing::new("nope".to_string()),
        };

        let err = worker.unwrap_private_key(request).await.unwrap_err();
        assert!(matches!(err, SessionError::Crypto(CryptoError::InvalidPassword)));
        assert!(err.is_invalid_password());
        assert!(!err.is_retryable());
    }

    #[test]
    fn request_debug_redacts_password() {
        let kp = generate_keypair();
        let request = UnlockRequest {
            envelope: seal_private_key(&kp, "pw", &FAST).unwrap(),
            public_key: kp.public.clone(),
            password: Zeroizing::new("hunter2".to_string()),
        };
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }
}

//! Shared helpers for session integration tests.
#![allow(dead_code)]

use secrelo_crypto::{
    generate_keypair, seal_private_key, KdfParams, Keypair, Recipient, UserId,
};
use secrelo_session::{
    AuthTokens, AuthUser, ClientSession, EncryptionBundle, LoginResponse, MemorySessionStore,
    PersistedAuth, SessionBus, SessionConfig,
};
use std::sync::{Arc, Once};
use zeroize::Zeroizing;

/// Minimal Argon2id cost so unlocks stay fast.
pub const FAST: KdfParams = KdfParams {
    ops_limit: 1,
    mem_limit: 64 * 1024,
};

static TRACING: Once = Once::new();

/// Installs a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A registered user as the server knows them.
pub struct Account {
    pub user: AuthUser,
    pub keypair: Keypair,
    pub password: &'static str,
    bundle: EncryptionBundle,
}

impl Account {
    /// Registers a user: fresh keypair sealed under `password`.
    pub fn register(id: &str, password: &'static str) -> Self {
        let keypair = generate_keypair();
        let envelope = seal_private_key(&keypair, password, &FAST).expect("seal");
        let bundle = EncryptionBundle {
            envelope,
            public_key: keypair.public.clone(),
        };
        Self {
            user: AuthUser {
                id: UserId::new(id),
                email: format!("{id}@example.com"),
                name: None,
            },
            keypair,
            password,
            bundle,
        }
    }

    pub fn id(&self) -> &UserId {
        &self.user.id
    }

    pub fn recipient(&self) -> Recipient {
        Recipient::new(self.user.id.clone(), self.keypair.public.clone())
    }

    pub fn tokens(&self) -> AuthTokens {
        AuthTokens {
            access_token: format!("access-{}", self.user.id),
            refresh_token: format!("refresh-{}", self.user.id),
        }
    }

    pub fn login_response(&self) -> LoginResponse {
        let tokens = self.tokens();
        LoginResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            user: self.user.clone(),
            encryption: Some(self.bundle.clone()),
        }
    }

    pub fn persisted(&self) -> PersistedAuth {
        PersistedAuth {
            tokens: self.tokens(),
            user: self.user.clone(),
        }
    }

    pub fn password(&self) -> Zeroizing<String> {
        Zeroizing::new(self.password.to_string())
    }
}

/// A tab: its own session store, joined to `bus`.
pub fn open_tab(
    bus: &SessionBus,
    config: SessionConfig,
) -> (Arc<MemorySessionStore>, ClientSession) {
    let store = Arc::new(MemorySessionStore::new());
    let session = ClientSession::new(store.clone(), bus.clone(), config).expect("session");
    (store, session)
}

/// Reopens a tab over an existing store, as a page reload would.
pub fn reload_tab(
    bus: &SessionBus,
    store: &Arc<MemorySessionStore>,
    config: SessionConfig,
) -> ClientSession {
    ClientSession::new(store.clone(), bus.clone(), config).expect("session")
}

/// Opens a tab, runs init with no stored auth, and logs `account` in.
pub async fn logged_in_tab(
    bus: &SessionBus,
    account: &Account,
    config: SessionConfig,
) -> (Arc<MemorySessionStore>, ClientSession) {
    let (store, session) = open_tab(bus, config);
    session.init(None).await.expect("init");
    session
        .login(account.login_response(), account.password())
        .await
        .expect("login");
    (store, session)
}

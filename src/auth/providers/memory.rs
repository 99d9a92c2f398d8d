use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::feed::{AuthSubscription, ChangeFeed};
use crate::auth::providers::IdentityProvider;
use crate::auth::session::{AuthChangeKind, FederatedRedirect, Identity, Session};
use crate::error::{self, PetcareError, PetcareResult};

const SESSION_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Clone)]
struct Account {
    identity: Identity,
    password: String,
}

/// In-process identity provider
///
/// Behaves like a hosted auth service (sessions, change events, federated
/// redirects) without a network. Latency and failures can be injected for
/// exercising the sync core.
pub struct MemoryIdentityProvider {
    accounts: DashMap<String, Account>,
    current: RwLock<Option<Session>>,
    feed: ChangeFeed,
    session_delay: Mutex<Duration>,
    session_failures: Mutex<VecDeque<PetcareError>>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            current: RwLock::new(None),
            feed: ChangeFeed::new(),
            session_delay: Mutex::new(Duration::ZERO),
            session_failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Register an account without emitting anything
    pub fn seed_user(&self, email: &str, password: &str) -> Identity {
        let identity = Identity {
            id: Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            metadata: HashMap::new(),
            created_at: Some(Utc::now()),
        };
        self.accounts.insert(
            email.to_lowercase(),
            Account {
                identity: identity.clone(),
                password: password.to_string(),
            },
        );
        identity
    }

    /// Issue a fresh session for an identity
    pub fn issue_session(identity: &Identity) -> Session {
        Session::new(
            Uuid::new_v4().to_string(),
            Some(Uuid::new_v4().to_string()),
            SESSION_LIFETIME_SECS,
            identity.clone(),
        )
    }

    /// Install a session silently, as if restored from storage before startup
    pub async fn restore_session(&self, session: Option<Session>) {
        *self.current.write().await = session;
    }

    /// Deliver an arbitrary change to listeners without touching the held session
    pub fn emit(&self, kind: AuthChangeKind, session: Option<Session>) -> usize {
        self.feed.emit(kind, session)
    }

    /// Rotate the held session's tokens and report `TokenRefreshed`
    pub async fn refresh_session(&self) -> PetcareResult<Session> {
        let mut current = self.current.write().await;
        let identity = match current.as_ref() {
            Some(session) => session.user.clone(),
            None => return Err(error::session_expired()),
        };
        let refreshed = Self::issue_session(&identity);
        *current = Some(refreshed.clone());
        self.feed.emit(AuthChangeKind::TokenRefreshed, Some(refreshed.clone()));
        Ok(refreshed)
    }

    /// Finish a federated sign-in, as when the redirect comes back
    pub async fn complete_federated(&self, email: &str) -> Session {
        let existing = self
            .accounts
            .get(&email.to_lowercase())
            .map(|account| account.identity.clone());
        let identity = match existing {
            Some(identity) => identity,
            None => self.seed_user(email, &Uuid::new_v4().to_string()),
        };
        self.install(AuthChangeKind::SignedIn, Self::issue_session(&identity))
            .await
    }

    /// Delay applied to every `current_session` call
    pub fn set_session_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.session_delay.lock() {
            *current = delay;
        }
    }

    /// Make the next `current_session` call fail
    pub fn fail_next_session_query(&self, err: PetcareError) {
        if let Ok(mut failures) = self.session_failures.lock() {
            failures.push_back(err);
        }
    }

    /// Number of registered change listeners
    pub fn listener_count(&self) -> usize {
        self.feed.subscriber_count()
    }

    async fn install(&self, kind: AuthChangeKind, session: Session) -> Session {
        *self.current.write().await = Some(session.clone());
        self.feed.emit(kind, Some(session.clone()));
        session
    }
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn current_session(&self) -> PetcareResult<Option<Session>> {
        let delay = self.session_delay.lock().map(|d| *d).unwrap_or_default();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let failure = self.session_failures.lock().ok().and_then(|mut f| f.pop_front());
        if let Some(err) = failure {
            return Err(err);
        }

        Ok(self.current.read().await.clone())
    }

    fn subscribe(&self) -> AuthSubscription {
        self.feed.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> PetcareResult<Session> {
        let identity = match self.accounts.get(&email.to_lowercase()) {
            Some(account) if account.password == password => account.identity.clone(),
            _ => {
                debug!(email, "Rejected sign-in");
                return Err(error::invalid_credentials());
            }
        };

        info!(identity = %identity.id, "Signed in");
        Ok(self
            .install(AuthChangeKind::SignedIn, Self::issue_session(&identity))
            .await)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: HashMap<String, Value>,
    ) -> PetcareResult<Identity> {
        let key = email.to_lowercase();
        if self.accounts.contains_key(&key) {
            return Err(error::user_already_exists(email));
        }

        let identity = Identity {
            id: Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            metadata,
            created_at: Some(Utc::now()),
        };
        self.accounts.insert(
            key,
            Account {
                identity: identity.clone(),
                password: password.to_string(),
            },
        );

        info!(identity = %identity.id, "Registered identity");
        Ok(identity)
    }

    async fn sign_in_with_federated(&self, provider: &str) -> PetcareResult<FederatedRedirect> {
        Ok(FederatedRedirect {
            provider: provider.to_string(),
            url: format!("memory://authorize?provider={}", provider),
        })
    }

    async fn sign_out(&self) -> PetcareResult<()> {
        *self.current.write().await = None;
        self.feed.emit(AuthChangeKind::SignedOut, None);
        Ok(())
    }
}

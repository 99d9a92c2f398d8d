//! Unit tests for the identity sync core
//!
//! These drive [`crate::IdentitySync`] against the in-memory provider and
//! store, using paused time where resolution order matters.


use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::{IdentitySync, MemoryIdentityProvider, MemoryProfileStore, SyncConfig, SyncState};

/// Core wired to in-memory collaborators the test can poke at
pub struct Fixture {
    pub provider: Arc<MemoryIdentityProvider>,
    pub store: Arc<MemoryProfileStore>,
    pub sync: IdentitySync,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_call_timeout(Duration::from_secs(5))
    }

    pub fn with_call_timeout(call_timeout: Duration) -> Self {
        let provider = Arc::new(MemoryIdentityProvider::new());
        let store = Arc::new(MemoryProfileStore::new());
        let config = SyncConfig::default().with_call_timeout(call_timeout);
        let sync = IdentitySync::new(provider.clone(), store.clone(), config);
        Self {
            provider,
            store,
            sync,
        }
    }

    /// Start and wait for the first settled state
    pub async fn started(self) -> Self {
        self.sync.start().await.unwrap();
        self.sync
            .wait_until_settled(Duration::from_secs(5))
            .await
            .unwrap();
        self
    }
}

/// Wait for a settled state matching `accept`
pub async fn wait_for(sync: &IdentitySync, accept: impl Fn(&SyncState) -> bool) -> SyncState {
    let mut updates = sync.subscribe();
    let current = sync.snapshot().await;
    if current.phase().is_settled() && accept(&current) {
        return current;
    }

    timeout(Duration::from_secs(5), async {
        loop {
            let state = updates.recv().await.unwrap();
            if state.phase().is_settled() && accept(&state) {
                return state;
            }
        }
    })
    .await
    .expect("state never settled")
}

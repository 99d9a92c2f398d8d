use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{self, PetcareError, PetcareResult};
use crate::profile::model::{Profile, ProfileField, ProfilePatch};
use crate::profile::store::ProfileStore;

/// In-process profile store
///
/// Records every projection it was asked for and lets callers script delays
/// and failures per call, so it doubles as a spy in tests.
#[derive(Default)]
pub struct MemoryProfileStore {
    records: DashMap<String, Profile>,
    get_delays: Mutex<VecDeque<Duration>>,
    get_failures: Mutex<VecDeque<PetcareError>>,
    insert_failures: Mutex<VecDeque<PetcareError>>,
    projections: Mutex<Vec<Vec<ProfileField>>>,
    get_calls: AtomicUsize,
    completed_gets: AtomicUsize,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a record in place without going through `insert`
    pub fn seed(&self, profile: Profile) {
        self.records.insert(profile.id.clone(), profile);
    }

    /// Current record, bypassing injected behaviour
    pub fn record(&self, identity_id: &str) -> Option<Profile> {
        self.records.get(identity_id).map(|entry| entry.clone())
    }

    /// Delay the next `get` by `delay` (queued, one entry per call)
    pub fn delay_next_get(&self, delay: Duration) {
        if let Ok(mut delays) = self.get_delays.lock() {
            delays.push_back(delay);
        }
    }

    /// Fail the next `get` with `err`
    pub fn fail_next_get(&self, err: PetcareError) {
        if let Ok(mut failures) = self.get_failures.lock() {
            failures.push_back(err);
        }
    }

    /// Fail the next `insert` with `err`
    pub fn fail_next_insert(&self, err: PetcareError) {
        if let Ok(mut failures) = self.insert_failures.lock() {
            failures.push_back(err);
        }
    }

    /// Projections requested by `get`, in call order
    pub fn projections(&self) -> Vec<Vec<ProfileField>> {
        self.projections.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Number of `get` calls started
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of `get` calls that ran to completion
    pub fn completed_gets(&self) -> usize {
        self.completed_gets.load(Ordering::SeqCst)
    }

    fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
        queue.lock().ok().and_then(|mut q| q.pop_front())
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, identity_id: &str, fields: &[ProfileField]) -> PetcareResult<Option<Profile>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut projections) = self.projections.lock() {
            projections.push(fields.to_vec());
        }

        if let Some(delay) = Self::pop(&self.get_delays) {
            sleep(delay).await;
        }

        let outcome = match Self::pop(&self.get_failures) {
            Some(err) => Err(err),
            None => Ok(self.record(identity_id)),
        };
        self.completed_gets.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    async fn insert(&self, profile: &Profile) -> PetcareResult<Profile> {
        if let Some(err) = Self::pop(&self.insert_failures) {
            return Err(err);
        }
        if self.records.contains_key(&profile.id) {
            return Err(error::store_request_failed(
                "insert",
                format!("duplicate key for profile {}", profile.id),
            ));
        }

        debug!(identity = %profile.id, "Inserted profile");
        self.records.insert(profile.id.clone(), profile.clone());
        Ok(profile.clone())
    }

    async fn update(&self, identity_id: &str, patch: &ProfilePatch) -> PetcareResult<Profile> {
        match self.records.get_mut(identity_id) {
            Some(mut entry) => {
                patch.apply_to(entry.value_mut());
                Ok(entry.clone())
            }
            None => Err(error::profile_not_found(identity_id)),
        }
    }
}

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, trace, warn};

use crate::auth::feed::ChangeReceiver;
use crate::auth::providers::IdentityProvider;
use crate::auth::session::{AuthChange, Session};
use crate::error::{self, PetcareError, PetcareResult};
use crate::events::EventStream;
use crate::profile::model::{Profile, ProfileField};
use crate::profile::store::ProfileStore;
use crate::sync::state::SyncState;

/// Requests the core hands to the worker so they run in resolution order
pub(crate) enum Job {
    Refetch {
        reply: oneshot::Sender<PetcareResult<Option<Profile>>>,
    },
    Resync {
        reply: oneshot::Sender<PetcareResult<()>>,
    },
    /// A failed action; queued so an in-flight resolution cannot overwrite it
    ReportError {
        error: PetcareError,
        reply: oneshot::Sender<()>,
    },
}

/// Mirror plus the sequence of the resolution it reflects
struct Mirror {
    state: SyncState,
    resolved_seq: Option<u64>,
}

/// State shared between the core handle and its worker
pub(crate) struct Shared {
    mirror: RwLock<Mirror>,
    alive: AtomicBool,
    states: EventStream<SyncState>,
}

impl Shared {
    pub(crate) fn new(states: EventStream<SyncState>) -> Self {
        Self {
            mirror: RwLock::new(Mirror {
                state: SyncState::initial(),
                resolved_seq: None,
            }),
            alive: AtomicBool::new(true),
            states,
        }
    }

    pub(crate) async fn snapshot(&self) -> SyncState {
        self.mirror.read().await.state.clone()
    }

    pub(crate) fn states(&self) -> &EventStream<SyncState> {
        &self.states
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Clear the liveness flag and wait out any commit in progress
    ///
    /// Returns false if the flag was already cleared.
    pub(crate) async fn shut_down(&self) -> bool {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return false;
        }
        drop(self.mirror.write().await);
        true
    }

    pub(crate) fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Replace the whole tuple, unless the core is torn down
    pub(crate) async fn commit<F>(&self, next: F) -> bool
    where
        F: FnOnce(&SyncState) -> SyncState,
    {
        let mut mirror = self.mirror.write().await;
        if !self.is_alive() {
            trace!("Commit skipped after teardown");
            return false;
        }
        self.apply(&mut mirror, next).await;
        true
    }

    /// Commit the outcome of resolution `seq`, unless a newer one already landed
    pub(crate) async fn commit_resolution<F>(&self, seq: u64, next: F) -> bool
    where
        F: FnOnce(&SyncState) -> SyncState,
    {
        let mut mirror = self.mirror.write().await;
        if !self.is_alive() {
            trace!(seq, "Resolution dropped after teardown");
            return false;
        }
        if mirror.resolved_seq.is_some_and(|last| seq < last) {
            debug!(seq, last = ?mirror.resolved_seq, "Discarding stale resolution");
            return false;
        }
        mirror.resolved_seq = Some(seq);
        self.apply(&mut mirror, next).await;
        true
    }

    async fn apply<F>(&self, mirror: &mut Mirror, next: F)
    where
        F: FnOnce(&SyncState) -> SyncState,
    {
        let mut state = next(&mirror.state);
        state.revision = mirror.state.revision + 1;
        mirror.state = state.clone();
        trace!(revision = state.revision, loading = state.loading, "State committed");
        // Published under the lock so subscribers see revisions in order
        self.states.publish(state).await;
    }
}

/// Result of resolving a session into mirror data
pub(crate) enum Resolution {
    Authenticated { session: Session, profile: Profile },
    Anonymous,
    Failed(PetcareError),
}

impl Resolution {
    fn apply(self, base: &SyncState) -> SyncState {
        match self {
            Resolution::Authenticated { session, profile } => base.authenticated(session, profile),
            Resolution::Anonymous => base.anonymous(),
            Resolution::Failed(err) => base.failed(err),
        }
    }
}

/// Run `call` with an upper bound; running out of time is an error
pub(crate) async fn guarded<T, F>(operation: &str, limit: Duration, call: F) -> PetcareResult<T>
where
    F: Future<Output = PetcareResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, ?limit, "Call timed out");
            Err(error::timeout(operation, limit))
        }
    }
}

/// Look up the profile for an identity, synthesizing the default when absent
pub(crate) async fn resolve_profile(
    store: &dyn ProfileStore,
    identity_id: &str,
    limit: Duration,
) -> PetcareResult<Profile> {
    match guarded("profile_get", limit, store.get(identity_id, ProfileField::ALL)).await {
        Ok(Some(profile)) => Ok(profile),
        Ok(None) => {
            debug!(identity = %identity_id, "No stored profile, using default");
            Ok(Profile::default_for(identity_id))
        }
        Err(err) if err.is_not_found() => Ok(Profile::default_for(identity_id)),
        Err(err) => Err(err),
    }
}

/// The single task that performs every resolution, one at a time
pub(crate) struct Worker {
    pub(crate) shared: Arc<Shared>,
    pub(crate) provider: Arc<dyn IdentityProvider>,
    pub(crate) store: Arc<dyn ProfileStore>,
    pub(crate) changes: ChangeReceiver,
    pub(crate) jobs: mpsc::UnboundedReceiver<Job>,
    pub(crate) call_timeout: Duration,
    pub(crate) next_seq: u64,
}

impl Worker {
    pub(crate) async fn run(mut self) {
        let seq = self.take_seq();
        let startup = self.resolve_current().await;
        self.shared
            .commit_resolution(seq, |state| startup.apply(state))
            .await;
        info!("Identity sync ready");

        let mut changes_open = true;
        loop {
            tokio::select! {
                biased;
                change = self.changes.recv(), if changes_open => match change {
                    Some(change) => self.on_change(change).await,
                    None => {
                        warn!("Provider change stream closed");
                        changes_open = false;
                    }
                },
                job = self.jobs.recv() => match job {
                    Some(job) => self.on_job(job).await,
                    None => break,
                },
            }
        }
        debug!("Identity sync worker stopped");
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    async fn on_change(&mut self, change: AuthChange) {
        let seq = self.take_seq();
        debug!(
            seq,
            kind = ?change.kind,
            provider_sequence = change.sequence,
            "Resolving session change"
        );

        self.shared.commit(SyncState::resolving).await;
        let resolution = self.resolve_session(change.session).await;
        self.shared
            .commit_resolution(seq, |state| resolution.apply(state))
            .await;
    }

    async fn on_job(&mut self, job: Job) {
        match job {
            Job::ReportError { error, reply } => {
                // Not a resolution, so no sequence number
                self.shared.commit(|state| state.with_error(error)).await;
                let _ = reply.send(());
            }
            Job::Refetch { reply } => {
                let seq = self.take_seq();
                let outcome = self.refetch(seq).await;
                let _ = reply.send(outcome);
            }
            Job::Resync { reply } => {
                let seq = self.take_seq();
                debug!(seq, "Manual resync");
                self.shared.commit(SyncState::resolving).await;
                let outcome = match self.resolve_current().await {
                    Resolution::Failed(err) => {
                        let reported = err.clone();
                        self.shared
                            .commit_resolution(seq, |state| state.failed(err))
                            .await;
                        Err(reported)
                    }
                    resolution => {
                        self.shared
                            .commit_resolution(seq, |state| resolution.apply(state))
                            .await;
                        Ok(())
                    }
                };
                let _ = reply.send(outcome);
            }
        }
    }

    /// Profile-only resolution for the identity already in the mirror
    async fn refetch(&self, seq: u64) -> PetcareResult<Option<Profile>> {
        let Some(identity_id) = self.shared.snapshot().await.identity_id().map(str::to_string) else {
            debug!("Refetch with no identity, nothing to do");
            return Ok(None);
        };

        match resolve_profile(self.store.as_ref(), &identity_id, self.call_timeout).await {
            Ok(profile) => {
                let fresh = profile.clone();
                let committed = self
                    .shared
                    .commit_resolution(seq, move |state| {
                        // The identity cannot change between read and commit while
                        // this worker is the only resolver
                        SyncState {
                            profile: Some(fresh),
                            error: None,
                            ..state.clone()
                        }
                    })
                    .await;
                if !committed {
                    return Err(error::not_running());
                }
                Ok(Some(profile))
            }
            Err(err) => {
                let err = err.into_resolution_failure();
                warn!(identity = %identity_id, error = %err, "Profile refetch failed");
                self.shared.commit(|state| state.with_error(err.clone())).await;
                Err(err)
            }
        }
    }

    async fn resolve_current(&self) -> Resolution {
        match guarded("current_session", self.call_timeout, self.provider.current_session()).await {
            Ok(session) => self.resolve_session(session).await,
            Err(err) => {
                warn!(error = %err, "Session query failed");
                Resolution::Failed(err.into_resolution_failure())
            }
        }
    }

    async fn resolve_session(&self, session: Option<Session>) -> Resolution {
        let Some(session) = session else {
            return Resolution::Anonymous;
        };

        match resolve_profile(self.store.as_ref(), &session.user.id, self.call_timeout).await {
            Ok(profile) => Resolution::Authenticated { session, profile },
            Err(err) => {
                warn!(identity = %session.user.id, error = %err, "Profile resolution failed");
                Resolution::Failed(err.into_resolution_failure())
            }
        }
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::feed::SubscriptionHandle;
use crate::auth::providers::IdentityProvider;
use crate::auth::session::{FederatedRedirect, Session};
use crate::config::SyncConfig;
use crate::error::{self, PetcareError, PetcareResult};
use crate::events::{EventStream, Subscriber};
use crate::profile::model::Profile;
use crate::profile::store::ProfileStore;
use crate::sync::state::{Phase, SyncState};
use crate::sync::worker::{guarded, Job, Shared, Worker};

/// Handles owned while the worker runs
#[derive(Default)]
struct Runtime {
    started: bool,
    jobs: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
    subscription: Option<SubscriptionHandle>,
}

/// Local mirror of the remote session and its profile
///
/// Create one per app, call [`IdentitySync::start`] once, share it by `Arc`
/// and call [`IdentitySync::teardown`] when done. All resolutions (startup,
/// provider events, refetch, resync) run on one worker task, and every state
/// change is a whole-tuple commit observable through [`IdentitySync::snapshot`]
/// or [`IdentitySync::subscribe`].
pub struct IdentitySync {
    shared: Arc<Shared>,
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn ProfileStore>,
    config: SyncConfig,
    runtime: Mutex<Runtime>,
}

impl IdentitySync {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn ProfileStore>,
        config: SyncConfig,
    ) -> Self {
        let states = EventStream::new(config.state_capacity.max(1), config.state_buffer);
        Self {
            shared: Arc::new(Shared::new(states)),
            provider,
            store,
            config,
            runtime: Mutex::new(Runtime::default()),
        }
    }

    /// Subscribe to the provider, then spawn the worker that runs the startup query
    ///
    /// May be called once per instance. Fails with `ConfigInvalid` before
    /// subscribing if the sync settings are unusable.
    pub async fn start(&self) -> PetcareResult<()> {
        if !self.shared.is_alive() {
            return Err(error::not_running());
        }
        self.config.validate()?;

        let mut runtime = self
            .runtime
            .lock()
            .map_err(|_| error::internal("sync runtime lock poisoned"))?;
        if runtime.started {
            return Err(error::already_started());
        }

        // Registered before the session query so no change can slip between them
        let (changes, handle) = self.provider.subscribe().into_parts();
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            shared: Arc::clone(&self.shared),
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            changes,
            jobs: jobs_rx,
            call_timeout: self.config.call_timeout(),
            next_seq: 0,
        };

        runtime.started = true;
        runtime.jobs = Some(jobs_tx);
        runtime.subscription = Some(handle);
        runtime.worker = Some(tokio::spawn(worker.run()));

        info!(provider = self.provider.name(), "Identity sync started");
        Ok(())
    }

    /// Stop the worker and release the provider subscription
    ///
    /// Idempotent. No commit lands after this returns.
    pub async fn teardown(&self) {
        if !self.shared.shut_down().await {
            return;
        }

        let (subscription, worker) = match self.runtime.lock() {
            Ok(mut runtime) => {
                runtime.jobs = None;
                (runtime.subscription.take(), runtime.worker.take())
            }
            Err(_) => (None, None),
        };
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        if let Some(worker) = worker {
            worker.abort();
        }
        info!("Identity sync torn down");
    }

    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    pub async fn snapshot(&self) -> SyncState {
        self.shared.snapshot().await
    }

    pub async fn phase(&self) -> Phase {
        self.snapshot().await.phase()
    }

    /// Stream of committed snapshots; recent ones can be replayed
    pub fn subscribe(&self) -> Subscriber<SyncState> {
        self.shared.states().subscribe()
    }

    /// Wait until the mirror is neither uninitialized nor resolving
    pub async fn wait_until_settled(&self, limit: Duration) -> PetcareResult<SyncState> {
        let mut updates = self.subscribe();
        let current = self.snapshot().await;
        if current.phase().is_settled() {
            return Ok(current);
        }

        let wait = async {
            loop {
                match updates.recv().await {
                    Ok(state) if state.phase().is_settled() => return Ok(state),
                    Ok(_) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Settle wait lagged, re-reading snapshot");
                        let state = self.snapshot().await;
                        if state.phase().is_settled() {
                            return Ok(state);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        return Err(error::not_running());
                    }
                }
            }
        };

        match tokio::time::timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => Err(error::timeout("wait_until_settled", limit)),
        }
    }

    /// Sign in with email and password
    ///
    /// The mirror updates through the provider's resulting change event. On
    /// failure only the error is committed.
    pub async fn sign_in_with_credentials(&self, email: &str, password: &str) -> PetcareResult<Session> {
        self.ensure_running()?;
        let call = self.provider.sign_in_with_password(email, password);
        match guarded("sign_in", self.config.call_timeout(), call).await {
            Ok(session) => {
                info!(identity = %session.user.id, "Sign-in accepted");
                Ok(session)
            }
            Err(err) => Err(self.report(err).await),
        }
    }

    /// Create an identity, give it a profile, then sign in
    ///
    /// A failed profile insert is only logged; resolution falls back to the
    /// default profile until a record exists.
    pub async fn sign_up_with_credentials(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> PetcareResult<Session> {
        self.ensure_running()?;

        let mut metadata = HashMap::new();
        if let Some(name) = display_name {
            metadata.insert("username".to_string(), Value::from(name));
        }

        let call = self.provider.sign_up(email, password, metadata);
        let identity = match guarded("sign_up", self.config.call_timeout(), call).await {
            Ok(identity) => identity,
            Err(err) => return Err(self.report(err).await),
        };

        let profile = Profile::new_account(identity.id.clone(), display_name.map(str::to_string));
        match guarded("profile_insert", self.config.call_timeout(), self.store.insert(&profile)).await {
            Ok(_) => debug!(identity = %identity.id, "Profile created"),
            Err(err) => warn!(identity = %identity.id, error = %err, "Profile insert failed, continuing"),
        }

        self.sign_in_with_credentials(email, password).await
    }

    /// Begin a federated sign-in; the caller navigates to the returned URL
    pub async fn sign_in_with_federated_provider(&self, provider: &str) -> PetcareResult<FederatedRedirect> {
        self.ensure_running()?;
        let call = self.provider.sign_in_with_federated(provider);
        match guarded("sign_in_federated", self.config.call_timeout(), call).await {
            Ok(redirect) => Ok(redirect),
            Err(err) => Err(self.report(err).await),
        }
    }

    pub async fn sign_out(&self) -> PetcareResult<()> {
        self.ensure_running()?;
        match guarded("sign_out", self.config.call_timeout(), self.provider.sign_out()).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.report(err).await),
        }
    }

    /// Re-read the profile of the mirrored identity
    ///
    /// Returns `Ok(None)` without committing when nobody is signed in.
    pub async fn refetch_profile(&self) -> PetcareResult<Option<Profile>> {
        let (reply, response) = oneshot::channel();
        self.submit(Job::Refetch { reply })?;
        response.await.map_err(|_| error::not_running())?
    }

    /// Re-run the startup query, e.g. after a failed resolution
    pub async fn resync(&self) -> PetcareResult<()> {
        let (reply, response) = oneshot::channel();
        self.submit(Job::Resync { reply })?;
        response.await.map_err(|_| error::not_running())?
    }

    fn ensure_running(&self) -> PetcareResult<()> {
        let started = self.runtime.lock().map(|runtime| runtime.started).unwrap_or(false);
        if started && self.shared.is_alive() {
            Ok(())
        } else {
            Err(error::not_running())
        }
    }

    fn submit(&self, job: Job) -> PetcareResult<()> {
        if !self.shared.is_alive() {
            return Err(error::not_running());
        }
        let runtime = self
            .runtime
            .lock()
            .map_err(|_| error::internal("sync runtime lock poisoned"))?;
        match &runtime.jobs {
            Some(jobs) => jobs.send(job).map_err(|_| error::not_running()),
            None => Err(error::not_running()),
        }
    }

    /// Record a failed action in the mirror and hand the error back
    ///
    /// The commit goes through the worker, after any resolution already
    /// running, and is awaited so the error is visible when the action returns.
    async fn report(&self, err: PetcareError) -> PetcareError {
        let err = err.into_action_failure();
        debug!(code = %err.code, "Action failed");
        let (reply, committed) = oneshot::channel();
        let job = Job::ReportError {
            error: err.clone(),
            reply,
        };
        if self.submit(job).is_ok() && committed.await.is_err() {
            debug!("Worker gone before the action error was recorded");
        }
        err
    }
}

impl Drop for IdentitySync {
    fn drop(&mut self) {
        self.shared.mark_dead();
        if let Ok(mut runtime) = self.runtime.lock() {
            runtime.jobs = None;
            if let Some(subscription) = runtime.subscription.take() {
                subscription.unsubscribe();
            }
            if let Some(worker) = runtime.worker.take() {
                worker.abort();
            }
        }
    }
}

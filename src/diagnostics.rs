use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::providers::IdentityProvider;
use crate::error::PetcareError;
use crate::profile::model::{Profile, ProfileField};
use crate::profile::store::ProfileStore;
use crate::sync::worker::guarded;

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// One step of a connection check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticStep {
    pub name: String,
    pub passed: bool,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Final verdict of a connection check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DiagnosticOutcome {
    /// Session present and its profile was read
    ProfileLoaded,
    /// Backend reachable, nobody signed in; the app should show its login screen
    SignedOut,
    /// Session present but no profile row (the default profile applies)
    ProfileMissing,
    /// A call failed
    Failed { error: PetcareError },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub steps: Vec<DiagnosticStep>,
    #[serde(flatten)]
    pub outcome: DiagnosticOutcome,
    pub profile: Option<Profile>,
}

impl ConnectionReport {
    fn new() -> Self {
        Self {
            steps: Vec::new(),
            outcome: DiagnosticOutcome::SignedOut,
            profile: None,
        }
    }

    fn step(&mut self, name: &str, passed: bool, detail: impl Into<String>) {
        self.steps.push(DiagnosticStep {
            name: name.to_string(),
            passed,
            detail: detail.into(),
            at: Utc::now(),
        });
    }

    fn fail(mut self, name: &str, error: PetcareError) -> Self {
        warn!(step = name, error = %error, "Connection check failed");
        self.step(name, false, error.to_string());
        self.outcome = DiagnosticOutcome::Failed { error };
        self
    }

    pub fn is_healthy(&self) -> bool {
        !matches!(self.outcome, DiagnosticOutcome::Failed { .. })
    }
}

/// Walk the session and profile read paths and report where they break
pub async fn check_connection(provider: &dyn IdentityProvider, store: &dyn ProfileStore) -> ConnectionReport {
    let mut report = ConnectionReport::new();

    let session = match guarded("current_session", CHECK_TIMEOUT, provider.current_session()).await {
        Ok(session) => session,
        Err(err) => return report.fail("session", err),
    };

    let Some(session) = session else {
        report.step("session", true, "no active session");
        info!("Connection check: signed out");
        return report;
    };
    report.step("session", true, format!("active session for {}", session.user.id));

    match guarded("profile_get", CHECK_TIMEOUT, store.get(&session.user.id, ProfileField::ALL)).await {
        Ok(Some(profile)) => {
            report.step("profile", true, "profile loaded");
            report.outcome = DiagnosticOutcome::ProfileLoaded;
            report.profile = Some(profile);
        }
        Ok(None) => {
            report.step("profile", true, "no profile row");
            report.outcome = DiagnosticOutcome::ProfileMissing;
        }
        Err(err) => return report.fail("profile", err),
    }

    info!(identity = %session.user.id, "Connection check passed");
    report
}

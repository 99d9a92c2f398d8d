use serde::{Deserialize, Serialize};

use crate::auth::session::{Identity, Session};
use crate::error::PetcareError;
use crate::profile::model::Profile;

/// Whether a settled mirror holds a signed-in user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Authenticated,
    Anonymous,
}

/// Lifecycle phase derived from a [`SyncState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "presence")]
pub enum Phase {
    /// Nothing committed yet
    Uninitialized,
    /// A resolution is in flight
    Resolving,
    /// The last resolution failed and the data is null
    Failed,
    Ready(Presence),
}

impl Phase {
    pub fn is_settled(self) -> bool {
        matches!(self, Phase::Failed | Phase::Ready(_))
    }
}

/// The mirrored `{session, identity, profile, loading, error}` tuple
///
/// Snapshots are only ever produced whole by the sync core, so a consumer
/// never sees a session without its identity or profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub session: Option<Session>,
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub loading: bool,
    pub error: Option<PetcareError>,
    /// Incremented on every commit
    pub revision: u64,
}

impl SyncState {
    /// State before the first commit
    pub fn initial() -> Self {
        Self {
            session: None,
            identity: None,
            profile: None,
            loading: true,
            error: None,
            revision: 0,
        }
    }

    /// Settled, signed-in state
    pub(crate) fn authenticated(&self, session: Session, profile: Profile) -> Self {
        Self {
            identity: Some(session.user.clone()),
            session: Some(session),
            profile: Some(profile),
            loading: false,
            error: None,
            revision: self.revision,
        }
    }

    /// Settled state with nobody signed in
    pub(crate) fn anonymous(&self) -> Self {
        Self {
            session: None,
            identity: None,
            profile: None,
            loading: false,
            error: None,
            revision: self.revision,
        }
    }

    /// Settled state after a failed resolution
    pub(crate) fn failed(&self, error: PetcareError) -> Self {
        Self {
            error: Some(error),
            ..self.anonymous()
        }
    }

    /// Same data, flagged as resolving
    pub(crate) fn resolving(&self) -> Self {
        Self {
            loading: true,
            error: None,
            ..self.clone()
        }
    }

    /// Same data with a reported error
    pub(crate) fn with_error(&self, error: PetcareError) -> Self {
        Self {
            error: Some(error),
            ..self.clone()
        }
    }

    pub fn phase(&self) -> Phase {
        if self.revision == 0 {
            Phase::Uninitialized
        } else if self.loading {
            Phase::Resolving
        } else if self.session.is_some() {
            Phase::Ready(Presence::Authenticated)
        } else if self.error.as_ref().is_some_and(PetcareError::is_resolution_failure) {
            Phase::Failed
        } else {
            Phase::Ready(Presence::Anonymous)
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    /// Identity id of the mirrored session, if any
    pub fn identity_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|identity| identity.id.as_str())
    }

    /// Session, identity and profile are all null or all present and agree on the id
    pub fn is_consistent(&self) -> bool {
        match (&self.session, &self.identity, &self.profile) {
            (None, None, None) => true,
            (Some(session), Some(identity), Some(profile)) => {
                session.user.id == identity.id && identity.id == profile.id
            }
            _ => false,
        }
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::initial()
    }
}

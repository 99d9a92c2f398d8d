//! Session and profile synchronization for the petcare app
//!
//! [`IdentitySync`] mirrors the identity provider's session and the matching
//! profile record into one snapshot that UI code can read and observe. The
//! provider and store are traits; HTTP implementations for the hosted backend
//! and in-memory ones for tests and offline use ship with the crate.

pub mod adapters;
pub mod auth;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod profile;
pub mod sync;

#[cfg(test)]
mod tests;

use std::sync::Arc;

pub use auth::{
    AuthChange, AuthChangeKind, AuthSubscription, FederatedRedirect, GoTrueProvider, Identity,
    IdentityProvider, MemoryIdentityProvider, Session, SessionFile, SubscriptionHandle,
};
pub use config::{BackendConfig, Config, ProfileConfig, SyncConfig};
pub use diagnostics::{check_connection, ConnectionReport, DiagnosticOutcome};
pub use error::{ErrorCategory, ErrorCode, ErrorSeverity, PetcareError, PetcareResult};
pub use events::{EventStream, Subscriber};
pub use profile::{
    MemoryProfileStore, PostgrestProfileStore, Profile, ProfileField, ProfilePatch, ProfileStore,
};
pub use sync::{IdentitySync, Phase, Presence, SyncState};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Provider and store for the hosted backend, sharing one access token
pub fn http_backends(
    config: &Config,
) -> PetcareResult<(Arc<GoTrueProvider>, Arc<PostgrestProfileStore>)> {
    let provider = GoTrueProvider::new(&config.backend)?;
    let store = PostgrestProfileStore::new(&config.backend, &config.profiles, provider.bearer())?;
    Ok((Arc::new(provider), Arc::new(store)))
}

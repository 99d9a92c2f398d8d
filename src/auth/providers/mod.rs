use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::feed::AuthSubscription;
use crate::auth::session::{FederatedRedirect, Identity, Session};
use crate::error::PetcareResult;

pub mod gotrue;
pub mod memory;

pub use gotrue::GoTrueProvider;
pub use memory::MemoryIdentityProvider;

/// Common trait for identity providers the sync core can mirror
///
/// Providers own the session. Successful sign-in/sign-out calls must also be
/// reported through the change stream returned by [`IdentityProvider::subscribe`];
/// the sync core relies on those events, not on the call results, to update
/// its mirror.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Point-in-time query of the current session
    async fn current_session(&self) -> PetcareResult<Option<Session>>;

    /// Register a listener for session changes
    fn subscribe(&self) -> AuthSubscription;

    /// Exchange email and password for a session
    async fn sign_in_with_password(&self, email: &str, password: &str) -> PetcareResult<Session>;

    /// Create a new identity
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: HashMap<String, Value>,
    ) -> PetcareResult<Identity>;

    /// Start a redirect-based federated sign-in
    async fn sign_in_with_federated(&self, provider: &str) -> PetcareResult<FederatedRedirect>;

    /// End the current session
    async fn sign_out(&self) -> PetcareResult<()>;
}

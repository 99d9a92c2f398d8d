use async_trait::async_trait;

use crate::error::PetcareResult;
use crate::profile::model::{Profile, ProfileField, ProfilePatch};

/// Record store holding one profile per identity
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Look up the profile of `identity_id`, projecting only `fields`
    ///
    /// A missing record is `Ok(None)`, never an error.
    async fn get(&self, identity_id: &str, fields: &[ProfileField]) -> PetcareResult<Option<Profile>>;

    /// Create a profile record
    async fn insert(&self, profile: &Profile) -> PetcareResult<Profile>;

    /// Apply a partial update; a missing record is a `ProfileNotFound` error
    async fn update(&self, identity_id: &str, patch: &ProfilePatch) -> PetcareResult<Profile>;
}

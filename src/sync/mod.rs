pub mod service;
pub mod state;
pub(crate) mod worker;

pub use service::IdentitySync;
pub use state::{Phase, Presence, SyncState};

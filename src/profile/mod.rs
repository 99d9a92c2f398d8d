pub mod memory;
pub mod model;
pub mod postgrest;
pub mod store;

pub use memory::MemoryProfileStore;
pub use model::{Profile, ProfileField, ProfilePatch};
pub use postgrest::PostgrestProfileStore;
pub use store::ProfileStore;

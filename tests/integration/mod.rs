//! Integration tests for petcare
//! These exercise the HTTP adapters and the sync core against mock backends

// Import the test harness
pub mod test_harness;

// Import individual test modules
pub mod gotrue_test;
pub mod hosted_sync_test;
pub mod postgrest_test;

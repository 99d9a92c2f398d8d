pub mod streams;
pub use streams::{EventStream, EventStreamStats, Subscriber};

// Defaults for the committed-state stream
pub const STATE_STREAM_CAPACITY: usize = 64;
pub const STATE_BUFFER_SIZE: usize = 16;

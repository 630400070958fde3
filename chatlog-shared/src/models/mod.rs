pub mod activity;
pub mod message;
pub mod page;
pub mod timestamp;

pub use activity::ActivitySummary;
pub use message::{CHANNEL_PREFIX, ChatMessage, bare_channel};
pub use page::MessagePage;

/// Largest page size or aggregation size any read endpoint accepts.
pub const MAX_LIMIT: usize = 1000;

/// Page size used when a request does not specify one.
pub const DEFAULT_LIMIT: usize = 10;

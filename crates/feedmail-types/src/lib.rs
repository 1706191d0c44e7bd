pub mod api;
pub mod models;
pub mod protocol;

pub use models::{Feed, User, clamp_frequency, MINIMUM_FREQUENCY_SECS};
pub use protocol::{ErrorCode, RequestKind};

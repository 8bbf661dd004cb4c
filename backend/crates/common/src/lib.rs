pub mod error;
pub mod types;

pub use error::{TributaryError, TributaryResult};
pub use types::SyncKey;

pub mod error;
pub mod readiness;
pub mod record;
pub mod store;
pub mod watch;

pub use error::{CacherError, Result};
pub use readiness::Readiness;
pub use store::Store;
pub use watch::{WatchDispatcher, WatchGuard};

pub mod listing;
pub mod retry;
pub mod session;

pub use listing::{DirectoryEntries, FileDetail, FileLister};
pub use retry::{with_retry, RetryPolicy};
pub use session::DfsSession;

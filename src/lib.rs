pub mod backend;
pub mod config;
pub mod detect;
pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod session;
pub mod store;
pub mod sync;
pub mod types;

// Re-export commonly used types
pub use config::SyncConfig;
pub use error::SyncError;
pub use session::SyncSession;
pub use sync::SyncResult;
pub use types::{IssueState, LocalIssueRecord, RemoteIssue, Revision, Scope, SyncCursor};

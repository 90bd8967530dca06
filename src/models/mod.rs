//! Data models for the application.
//!
//! These are immutable value snapshots built fresh from gateway responses on
//! every engine call. Only users outlive a call, inside the user cache.

pub mod commit;
pub mod event;
pub mod merge_request;
pub mod project;
pub mod user;
pub mod workload;

// Re-exports for convenient access
pub use commit::Commit;
pub use event::Event;
pub use merge_request::{MergeRequest, MergeRequestWithStatus};
pub use project::Project;
pub use user::{User, UserStatus};
pub use workload::UserWorkload;

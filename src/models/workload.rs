//! Per-person workload snapshot.

use super::{MergeRequest, User};
use serde::Serialize;

/// A team member together with their current review load.
#[derive(Debug, Clone, Serialize)]
pub struct UserWorkload {
    pub user: User,

    /// Number of unresolved merge requests (involved, not yet approved).
    pub mr_count: usize,

    /// Number of commits attributed to the user in the analyzed project.
    pub commits: usize,

    /// The unresolved merge requests backing `mr_count`.
    ///
    /// Only populated by the active-MR analyses.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub active_mrs: Vec<MergeRequest>,
}

impl UserWorkload {
    /// Create a workload entry without an active MR list.
    pub fn new(user: User, mr_count: usize, commits: usize) -> Self {
        Self {
            user,
            mr_count,
            commits,
            active_mrs: Vec::new(),
        }
    }
}

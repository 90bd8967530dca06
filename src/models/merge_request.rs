//! Merge request models.

use super::User;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A merge request with its participants resolved to full user records.
///
/// `iid` (the project-scoped number) is the key for approval and update
/// calls, not `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    /// GitLab MR ID (global).
    pub id: i64,

    /// Project-scoped MR number.
    pub iid: i64,

    pub title: String,
    pub description: String,

    /// URL to MR in GitLab web UI.
    pub web_url: String,

    pub author: Option<User>,
    pub assignee: Option<User>,

    /// Reviewers; order is irrelevant, membership matters.
    pub reviewers: Vec<User>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub project_id: i64,

    /// Draft MRs are never counted as active review work.
    pub draft: bool,

    /// Branch being merged.
    pub source_branch: String,
}

impl MergeRequest {
    /// ID of the author, if the author could be resolved.
    pub fn author_id(&self) -> Option<i64> {
        self.author.as_ref().map(|u| u.id)
    }

    /// Whether the user is the assignee.
    pub fn is_assignee(&self, user_id: i64) -> bool {
        self.assignee.as_ref().is_some_and(|u| u.id == user_id)
    }

    /// Whether the user is one of the reviewers.
    pub fn is_reviewer(&self, user_id: i64) -> bool {
        self.reviewers.iter().any(|u| u.id == user_id)
    }

    /// Key identifying the MR across projects.
    pub fn key(&self) -> (i64, i64) {
        (self.project_id, self.iid)
    }
}

/// A merge request plus derived status, recomputed on every call.
#[derive(Debug, Clone, Serialize)]
pub struct MergeRequestWithStatus {
    #[serde(flatten)]
    pub merge_request: MergeRequest,

    /// Users who approved the MR. Empty if the lookup failed.
    pub approvals: Vec<User>,
    pub approval_count: usize,

    /// No update for more than the working-day threshold.
    pub is_stalled: bool,

    /// Source branch matches the caller's checked-out branch.
    pub is_current_branch: bool,

    /// Project matches the caller's working copy.
    pub is_current_project: bool,
}

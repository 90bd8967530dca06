//! Remote data gateway port.
//!
//! The engine reaches the remote platform only through this trait. Adapters:
//! [`GitLabGateway`](super::gitlab_gateway::GitLabGateway) talks to the API,
//! [`CachedGateway`](super::cached_gateway::CachedGateway) memoizes users on
//! top of any gateway, and
//! [`InMemoryGateway`](super::memory_gateway::InMemoryGateway) serves fixtures.

use crate::error::AppError;
use crate::models::{Commit, Event, MergeRequest, Project, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Merge request state filter for open merge requests.
pub const STATE_OPENED: &str = "opened";

/// Merge request scope covering every visible merge request.
pub const SCOPE_ALL: &str = "all";

/// Read/write operations against the remote platform.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Get a project by path with namespace (or numeric ID as a string).
    async fn get_project(&self, path: &str) -> Result<Project, AppError>;

    /// List merge requests by state, optionally narrowed by scope.
    async fn list_merge_requests(
        &self,
        state: &str,
        scope: Option<&str>,
    ) -> Result<Vec<MergeRequest>, AppError>;

    /// Get a single merge request by project and IID.
    async fn get_merge_request(&self, project_id: i64, mr_iid: i64)
        -> Result<MergeRequest, AppError>;

    /// Users who approved the merge request.
    async fn get_merge_request_approvals(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<Vec<User>, AppError>;

    /// Set the assignee and reviewers of a merge request.
    async fn update_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
        assignee_id: Option<i64>,
        reviewer_ids: &[i64],
    ) -> Result<(), AppError>;

    /// The full user directory.
    async fn get_all_users(&self) -> Result<Vec<User>, AppError>;

    /// Resolve a handle to a user.
    async fn get_user_by_username(&self, username: &str) -> Result<User, AppError>;

    /// The user the token belongs to.
    async fn get_current_user(&self) -> Result<User, AppError>;

    /// Recent commits of a project.
    async fn list_commits(&self, project_id: i64) -> Result<Vec<Commit>, AppError>;

    /// Contribution events of a user after `since` and, if given, before `until`.
    async fn get_user_events(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, AppError>;

    /// Best-effort warm-up for the given handles.
    async fn preload_users_by_usernames(&self, usernames: &[String]) -> Result<(), AppError>;
}

//! Direct GitLab adapter for the [`Gateway`] port.
//!
//! Raw API records are converted into domain models here. Merge request
//! participants are resolved to full user records (email and status) through
//! a strict batch, and every resolved user is stored in the shared
//! [`UserCache`], which is consulted before any per-ID lookup.

use crate::error::AppError;
use crate::models::{Commit, Event, MergeRequest, Project, User, UserStatus};
use crate::services::fetch::{FetchOrchestrator, FetchPolicy};
use crate::services::gateway::Gateway;
use crate::services::gitlab_client::{
    GitLabClient, GitLabCommit, GitLabEvent, GitLabMergeRequest, GitLabUser, MergeRequestsQuery,
};
use crate::services::user_cache::UserCache;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

const TARGET_MERGE_REQUEST: &str = "merge_request";
const TARGET_MERGEREQUEST: &str = "mergerequest";
const TARGET_ISSUE: &str = "issue";
const TARGET_NOTE: &str = "note";
const TARGET_DIFF_NOTE: &str = "diffnote";

/// Gateway talking to the GitLab REST API.
pub struct GitLabGateway {
    client: GitLabClient,
    users: Arc<UserCache>,
    fetcher: FetchOrchestrator,
}

impl GitLabGateway {
    /// Create a gateway over `client`, sharing `users` with other adapters.
    pub fn new(client: GitLabClient, users: Arc<UserCache>, fetcher: FetchOrchestrator) -> Self {
        Self {
            client,
            users,
            fetcher,
        }
    }

    /// Fetch a user's status and build the domain record.
    async fn complete_user(&self, user: GitLabUser) -> Result<User, AppError> {
        let status = self.client.get_user_status(user.id).await?;
        let user = User {
            id: user.id,
            email: user.best_email(),
            username: user.username,
            status: UserStatus {
                message: status.message.unwrap_or_default(),
                availability: status.availability.unwrap_or_default(),
            },
        };
        self.users.put(&user);
        Ok(user)
    }

    /// Resolve a user by ID, from the cache when possible.
    async fn user_by_id(&self, user_id: i64) -> Result<User, AppError> {
        if let Some(user) = self.users.get_by_id(user_id) {
            return Ok(user);
        }

        let raw = self.client.get_user(user_id).await?;
        self.complete_user(raw).await
    }

    /// Resolve every ID or fail.
    async fn resolve_users(&self, ids: Vec<i64>) -> Result<HashMap<i64, User>, AppError> {
        self.fetcher
            .fetch_all(ids, FetchPolicy::Strict, |id| self.user_by_id(id))
            .await
    }

    /// Convert raw merge requests, resolving all participants in one batch.
    async fn convert_merge_requests(
        &self,
        raw: Vec<GitLabMergeRequest>,
    ) -> Result<Vec<MergeRequest>, AppError> {
        let ids: Vec<i64> = raw.iter().flat_map(|mr| mr.participant_ids()).collect();
        let users = self
            .resolve_users(ids)
            .await
            .map_err(|e| e.context("Failed to get users"))?;

        Ok(raw
            .into_iter()
            .map(|mr| convert_merge_request(mr, &users))
            .collect())
    }

    /// Project paths for the given IDs; unresolvable projects are left out.
    async fn project_paths(&self, ids: Vec<i64>) -> Result<HashMap<i64, String>, AppError> {
        self.fetcher
            .fetch_all(ids, FetchPolicy::Lenient, |id| async move {
                let project = self.client.get_project(&id.to_string()).await?;
                Ok(convert_project(project.id, project.path_with_namespace, project.path).path)
            })
            .await
    }
}

#[async_trait]
impl Gateway for GitLabGateway {
    async fn get_project(&self, path: &str) -> Result<Project, AppError> {
        let project = self
            .client
            .get_project(path)
            .await
            .map_err(|e| e.context("Failed to get project"))?;
        Ok(convert_project(
            project.id,
            project.path_with_namespace,
            project.path,
        ))
    }

    async fn list_merge_requests(
        &self,
        state: &str,
        scope: Option<&str>,
    ) -> Result<Vec<MergeRequest>, AppError> {
        let query = MergeRequestsQuery {
            state: Some(state.to_string()),
            scope: scope.map(str::to_string),
        };
        let raw = self
            .client
            .list_merge_requests(&query)
            .await
            .map_err(|e| e.context("Failed to list merge requests"))?;

        self.convert_merge_requests(raw).await
    }

    async fn get_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<MergeRequest, AppError> {
        let raw = self
            .client
            .get_merge_request(project_id, mr_iid)
            .await
            .map_err(|e| e.context("Failed to get merge request"))?;

        let mut converted = self.convert_merge_requests(vec![raw]).await?;
        converted
            .pop()
            .ok_or_else(|| AppError::internal("Merge request conversion produced no result"))
    }

    async fn get_merge_request_approvals(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<Vec<User>, AppError> {
        let approvals = self
            .client
            .get_mr_approvals(project_id, mr_iid)
            .await
            .map_err(|e| e.context("Failed to get merge request approvals"))?;

        let ids: Vec<i64> = approvals.approved_by.iter().map(|a| a.user.id).collect();
        let users = self
            .resolve_users(ids.clone())
            .await
            .map_err(|e| e.context("Failed to get approval user"))?;

        Ok(ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }

    async fn update_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
        assignee_id: Option<i64>,
        reviewer_ids: &[i64],
    ) -> Result<(), AppError> {
        self.client
            .update_merge_request(project_id, mr_iid, assignee_id, reviewer_ids)
            .await
            .map_err(|e| e.context("Failed to update merge request"))
    }

    async fn get_all_users(&self) -> Result<Vec<User>, AppError> {
        let raw = self
            .client
            .list_users()
            .await
            .map_err(|e| e.context("Failed to list users"))?;

        // Directory entries skip the status call; the email index only needs
        // ID and email.
        Ok(raw
            .into_iter()
            .map(|u| User {
                id: u.id,
                email: u.best_email(),
                username: u.username,
                status: UserStatus::default(),
            })
            .collect())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User, AppError> {
        if let Some(user) = self.users.get_by_username(username) {
            return Ok(user);
        }

        let raw = self
            .client
            .find_users_by_username(username)
            .await
            .map_err(|e| e.context("Failed to look up user"))?
            .into_iter()
            .find(|u| u.username == username)
            .ok_or_else(|| AppError::not_found_with_id("User", username))?;

        self.complete_user(raw).await
    }

    async fn get_current_user(&self) -> Result<User, AppError> {
        let raw = self
            .client
            .current_user()
            .await
            .map_err(|e| e.context("Failed to get current user"))?;
        self.complete_user(raw).await
    }

    async fn list_commits(&self, project_id: i64) -> Result<Vec<Commit>, AppError> {
        let raw = self
            .client
            .list_commits(project_id)
            .await
            .map_err(|e| e.context("Failed to list commits"))?;
        Ok(raw.into_iter().map(convert_commit).collect())
    }

    async fn get_user_events(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, AppError> {
        // GitLab filters on exclusive whole dates; widen by a day on each side
        // and trim to the exact window afterwards.
        let raw = self
            .client
            .list_user_events(
                user_id,
                since - Duration::days(1),
                until.map(|u| u + Duration::days(1)),
            )
            .await
            .map_err(|e| e.context("Failed to get user events"))?;

        let raw: Vec<GitLabEvent> = raw
            .into_iter()
            .filter(|e| match e.created_at {
                Some(at) => at >= since && until.map_or(true, |u| at < u),
                None => true,
            })
            .collect();

        let project_ids: Vec<i64> = raw
            .iter()
            .filter_map(|e| e.project_id)
            .filter(|&id| id > 0)
            .collect();
        let paths = self.project_paths(project_ids).await?;

        let base_url = self.client.base_url();
        Ok(raw
            .into_iter()
            .map(|event| {
                let path = event
                    .project_id
                    .and_then(|id| paths.get(&id).cloned())
                    .unwrap_or_default();
                convert_event(base_url, event, path)
            })
            .collect())
    }

    async fn preload_users_by_usernames(&self, _usernames: &[String]) -> Result<(), AppError> {
        Ok(())
    }
}

fn convert_project(id: i64, path_with_namespace: String, path: String) -> Project {
    let path = if path_with_namespace.is_empty() {
        path
    } else {
        path_with_namespace
    };
    Project { id, path }
}

fn convert_commit(commit: GitLabCommit) -> Commit {
    Commit {
        id: commit.id,
        author_name: commit.author_name,
        author_email: commit.author_email,
        created_at: commit.created_at,
        message: commit.message,
        web_url: commit.web_url,
    }
}

/// Build a domain MR from a raw one. Participants missing from `users` are
/// dropped.
fn convert_merge_request(mr: GitLabMergeRequest, users: &HashMap<i64, User>) -> MergeRequest {
    let reviewers = mr
        .reviewers
        .iter()
        .flatten()
        .filter_map(|r| users.get(&r.id).cloned())
        .collect();

    MergeRequest {
        id: mr.id,
        iid: mr.iid,
        title: mr.title,
        description: mr.description.unwrap_or_default(),
        web_url: mr.web_url,
        author: users.get(&mr.author.id).cloned(),
        assignee: mr.assignee.and_then(|a| users.get(&a.id).cloned()),
        reviewers,
        created_at: mr.created_at,
        updated_at: mr.updated_at,
        project_id: mr.project_id,
        draft: mr.draft || mr.work_in_progress,
        source_branch: mr.source_branch,
    }
}

fn convert_event(base_url: &str, event: GitLabEvent, project_path: String) -> Event {
    let web_url = event_url(base_url, &event, &project_path);
    let push = event.push_data.unwrap_or_default();
    let (note_body, noteable_type) = event
        .note
        .map(|n| (n.body, n.noteable_type.unwrap_or_default()))
        .unwrap_or_default();

    Event {
        id: event.id,
        action: event.action_name,
        target_type: event.target_type.unwrap_or_default(),
        target_title: event.target_title.unwrap_or_default(),
        target_id: event.target_id.unwrap_or_default(),
        project_id: event.project_id.unwrap_or_default(),
        project_path,
        created_at: event.created_at,
        web_url,
        push_ref: push.ref_name.unwrap_or_default(),
        push_action: push.action,
        commit_count: push.commit_count,
        commit_title: push.commit_title.unwrap_or_default(),
        note_body,
        noteable_type,
    }
}

fn merge_request_url(base_url: &str, project_path: &str, iid: i64) -> String {
    format!("{}/{}/-/merge_requests/{}", base_url, project_path, iid)
}

fn issue_url(base_url: &str, project_path: &str, iid: i64) -> String {
    format!("{}/{}/-/issues/{}", base_url, project_path, iid)
}

fn is_merge_request_type(kind: &str) -> bool {
    kind == TARGET_MERGE_REQUEST || kind == TARGET_MERGEREQUEST
}

/// Web link for an event target, or an empty string when none can be built.
fn event_url(base_url: &str, event: &GitLabEvent, project_path: &str) -> String {
    if project_path.is_empty() {
        return String::new();
    }

    let target_type = event
        .target_type
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let target_iid = event.target_iid.unwrap_or_default();

    let is_note = target_type == TARGET_NOTE
        || target_type == TARGET_DIFF_NOTE
        || event.action_name.to_lowercase().contains("comment");

    if is_note {
        if let Some(note) = &event.note {
            let noteable = note.noteable_type.as_deref().unwrap_or_default().to_lowercase();
            if !noteable.is_empty() {
                let iid = note.noteable_iid.filter(|&iid| iid > 0).unwrap_or(target_iid);
                return if is_merge_request_type(&noteable) {
                    format!("{}#note_{}", merge_request_url(base_url, project_path, iid), note.id)
                } else if noteable == TARGET_ISSUE {
                    format!("{}#note_{}", issue_url(base_url, project_path, iid), note.id)
                } else {
                    String::new()
                };
            }
        }

        if target_iid > 0 {
            if target_type.contains(TARGET_MERGE_REQUEST) || target_type.contains(TARGET_MERGEREQUEST)
            {
                return merge_request_url(base_url, project_path, target_iid);
            }
            if target_type.contains(TARGET_ISSUE) {
                return issue_url(base_url, project_path, target_iid);
            }
        }
        return String::new();
    }

    if target_iid <= 0 {
        return String::new();
    }

    if is_merge_request_type(&target_type) {
        merge_request_url(base_url, project_path, target_iid)
    } else if target_type == TARGET_ISSUE {
        issue_url(base_url, project_path, target_iid)
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gitlab_client::GitLabEventNote;

    const BASE: &str = "https://gitlab.example.com";

    fn event(target_type: Option<&str>, action: &str, target_iid: Option<i64>) -> GitLabEvent {
        GitLabEvent {
            id: 1,
            project_id: Some(5),
            action_name: action.to_string(),
            target_id: Some(99),
            target_iid,
            target_type: target_type.map(str::to_string),
            target_title: Some("Title".to_string()),
            created_at: None,
            push_data: None,
            note: None,
        }
    }

    fn note(noteable_type: &str, noteable_iid: Option<i64>) -> GitLabEventNote {
        GitLabEventNote {
            id: 77,
            body: "LGTM".to_string(),
            noteable_type: Some(noteable_type.to_string()),
            noteable_iid,
        }
    }

    #[test]
    fn test_merge_request_event_url() {
        let e = event(Some("MergeRequest"), "opened", Some(12));
        assert_eq!(
            event_url(BASE, &e, "group/proj"),
            "https://gitlab.example.com/group/proj/-/merge_requests/12"
        );

        let e = event(Some("merge_request"), "accepted", Some(3));
        assert_eq!(
            event_url(BASE, &e, "group/proj"),
            "https://gitlab.example.com/group/proj/-/merge_requests/3"
        );
    }

    #[test]
    fn test_issue_event_url() {
        let e = event(Some("Issue"), "closed", Some(4));
        assert_eq!(
            event_url(BASE, &e, "group/proj"),
            "https://gitlab.example.com/group/proj/-/issues/4"
        );
    }

    #[test]
    fn test_note_event_url() {
        let mut e = event(Some("DiffNote"), "commented on", Some(8));
        e.note = Some(note("MergeRequest", Some(8)));
        assert_eq!(
            event_url(BASE, &e, "group/proj"),
            "https://gitlab.example.com/group/proj/-/merge_requests/8#note_77"
        );

        let mut e = event(Some("Note"), "commented on", Some(2));
        e.note = Some(note("Issue", None));
        assert_eq!(
            event_url(BASE, &e, "group/proj"),
            "https://gitlab.example.com/group/proj/-/issues/2#note_77"
        );
    }

    #[test]
    fn test_note_without_noteable_falls_back_to_target() {
        let e = event(Some("MergeRequest"), "commented on", Some(6));
        assert_eq!(
            event_url(BASE, &e, "group/proj"),
            "https://gitlab.example.com/group/proj/-/merge_requests/6"
        );
    }

    #[test]
    fn test_unknown_or_unresolved_events_have_no_url() {
        let e = event(None, "pushed to", None);
        assert_eq!(event_url(BASE, &e, "group/proj"), "");

        let e = event(Some("MergeRequest"), "opened", Some(12));
        assert_eq!(event_url(BASE, &e, ""), "");

        let e = event(Some("Milestone"), "created", Some(1));
        assert_eq!(event_url(BASE, &e, "group/proj"), "");
    }

    #[test]
    fn test_convert_event_copies_push_and_note_fields() {
        let mut raw = event(Some("Note"), "commented on", Some(2));
        raw.note = Some(note("Issue", Some(2)));
        let converted = convert_event(BASE, raw, "group/proj".to_string());

        assert_eq!(converted.note_body, "LGTM");
        assert_eq!(converted.noteable_type, "Issue");
        assert!(converted.is_note());
        assert!(!converted.is_push());
        assert_eq!(converted.project_path, "group/proj");
    }

    #[test]
    fn test_convert_merge_request_drops_unresolved_participants() {
        let raw: GitLabMergeRequest = serde_json::from_str(
            r#"{
                "id": 1, "iid": 2, "project_id": 3, "title": "t", "description": null,
                "web_url": "u", "source_branch": "b",
                "created_at": "2024-01-15T10:30:00Z", "updated_at": "2024-01-15T10:30:00Z",
                "author": {"id": 1, "username": "a"},
                "assignee": {"id": 2, "username": "b"},
                "reviewers": [{"id": 3, "username": "c"}, {"id": 4, "username": "d"}],
                "work_in_progress": true
            }"#,
        )
        .unwrap();

        let users: HashMap<i64, User> = [1, 2, 3]
            .into_iter()
            .map(|id| (id, User::new(id, format!("user{}", id))))
            .collect();
        let mr = convert_merge_request(raw, &users);

        assert_eq!(mr.author_id(), Some(1));
        assert!(mr.is_assignee(2));
        assert_eq!(mr.reviewers.len(), 1);
        assert!(mr.draft);
        assert_eq!(mr.description, "");
    }

    #[test]
    fn test_project_path_prefers_namespace() {
        assert_eq!(
            convert_project(1, "group/proj".into(), "proj".into()).path,
            "group/proj"
        );
        assert_eq!(convert_project(1, String::new(), "proj".into()).path, "proj");
    }
}

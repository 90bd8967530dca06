//! Fixture-backed [`Gateway`] for tests and offline runs.
//!
//! Every call is counted per [`Operation`], and failures can be injected for
//! a whole operation or for a single key (a handle, a project ID, or a
//! merge request built with [`InMemoryGateway::merge_request_key`]).

use crate::error::AppError;
use crate::models::{Commit, Event, MergeRequest, Project, User};
use crate::services::gateway::{Gateway, SCOPE_ALL, STATE_OPENED};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Gateway operations, used for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetProject,
    ListMergeRequests,
    GetMergeRequest,
    GetApprovals,
    UpdateMergeRequest,
    GetAllUsers,
    GetUserByUsername,
    GetCurrentUser,
    ListCommits,
    GetUserEvents,
    PreloadUsers,
}

/// An assignment write recorded by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpdate {
    pub project_id: i64,
    pub mr_iid: i64,
    pub assignee_id: Option<i64>,
    pub reviewer_ids: Vec<i64>,
}

type ErrorFactory = Box<dyn Fn() -> AppError + Send + Sync>;

struct Failure {
    operation: Operation,
    key: Option<String>,
    make: ErrorFactory,
}

#[derive(Default)]
struct Fixtures {
    projects: Vec<Project>,
    merge_requests: Vec<MergeRequest>,
    approvals: HashMap<(i64, i64), Vec<User>>,
    users: Vec<User>,
    current_user: Option<User>,
    commits: HashMap<i64, Vec<Commit>>,
    events: HashMap<i64, Vec<Event>>,
}

/// In-memory gateway over fixed fixtures.
#[derive(Default)]
pub struct InMemoryGateway {
    fixtures: Mutex<Fixtures>,
    failures: Mutex<Vec<Failure>>,
    calls: Mutex<HashMap<Operation, usize>>,
    updates: Mutex<Vec<RecordedUpdate>>,
    approval_delay: Option<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failure key for a merge request.
    pub fn merge_request_key(project_id: i64, mr_iid: i64) -> String {
        format!("{}!{}", project_id, mr_iid)
    }

    pub fn with_users(self, users: impl IntoIterator<Item = User>) -> Self {
        lock(&self.fixtures).users.extend(users);
        self
    }

    pub fn with_current_user(self, user: User) -> Self {
        lock(&self.fixtures).current_user = Some(user);
        self
    }

    pub fn with_project(self, project: Project) -> Self {
        lock(&self.fixtures).projects.push(project);
        self
    }

    /// Add open merge requests.
    pub fn with_merge_requests(self, mrs: impl IntoIterator<Item = MergeRequest>) -> Self {
        lock(&self.fixtures).merge_requests.extend(mrs);
        self
    }

    pub fn with_approvals(self, project_id: i64, mr_iid: i64, approvers: Vec<User>) -> Self {
        lock(&self.fixtures)
            .approvals
            .insert((project_id, mr_iid), approvers);
        self
    }

    pub fn with_commits(self, project_id: i64, commits: Vec<Commit>) -> Self {
        lock(&self.fixtures).commits.insert(project_id, commits);
        self
    }

    pub fn with_events(self, user_id: i64, events: Vec<Event>) -> Self {
        lock(&self.fixtures).events.insert(user_id, events);
        self
    }

    /// Delay every approval lookup, to exercise concurrent batches.
    pub fn with_approval_delay(mut self, delay: Duration) -> Self {
        self.approval_delay = Some(delay);
        self
    }

    /// Make every call to `operation` fail.
    pub fn fail(
        &self,
        operation: Operation,
        make: impl Fn() -> AppError + Send + Sync + 'static,
    ) {
        lock(&self.failures).push(Failure {
            operation,
            key: None,
            make: Box::new(make),
        });
    }

    /// Make calls to `operation` for one key fail.
    pub fn fail_for(
        &self,
        operation: Operation,
        key: impl Into<String>,
        make: impl Fn() -> AppError + Send + Sync + 'static,
    ) {
        lock(&self.failures).push(Failure {
            operation,
            key: Some(key.into()),
            make: Box::new(make),
        });
    }

    /// Number of calls made to `operation` so far.
    pub fn calls(&self, operation: Operation) -> usize {
        lock(&self.calls).get(&operation).copied().unwrap_or(0)
    }

    /// Every assignment write, in call order.
    pub fn updates(&self) -> Vec<RecordedUpdate> {
        lock(&self.updates).clone()
    }

    /// Count the call and return an injected failure, if any.
    fn enter(&self, operation: Operation, key: Option<&str>) -> Result<(), AppError> {
        *lock(&self.calls).entry(operation).or_insert(0) += 1;

        let failures = lock(&self.failures);
        let hit = failures.iter().find(|f| {
            f.operation == operation
                && match (&f.key, key) {
                    (None, _) => true,
                    (Some(expected), Some(actual)) => expected == actual,
                    (Some(_), None) => false,
                }
        });

        match hit {
            Some(failure) => Err((failure.make)()),
            None => Ok(()),
        }
    }

    fn find_user(&self, user_id: i64) -> Option<User> {
        let fixtures = lock(&self.fixtures);
        fixtures
            .users
            .iter()
            .chain(fixtures.current_user.iter())
            .find(|u| u.id == user_id)
            .cloned()
    }
}

#[async_trait]
impl Gateway for InMemoryGateway {
    async fn get_project(&self, path: &str) -> Result<Project, AppError> {
        self.enter(Operation::GetProject, Some(path))?;

        lock(&self.fixtures)
            .projects
            .iter()
            .find(|p| p.path == path || p.id.to_string() == path)
            .cloned()
            .ok_or_else(|| AppError::not_found_with_id("Project", path))
    }

    async fn list_merge_requests(
        &self,
        state: &str,
        scope: Option<&str>,
    ) -> Result<Vec<MergeRequest>, AppError> {
        self.enter(Operation::ListMergeRequests, None)?;

        // Fixtures are all open merge requests.
        if state != STATE_OPENED && state != SCOPE_ALL {
            return Ok(Vec::new());
        }

        let fixtures = lock(&self.fixtures);
        let me = fixtures.current_user.as_ref().map(|u| u.id);
        let mrs = fixtures.merge_requests.iter();

        // Without a scope GitLab lists the caller's own merge requests.
        let filtered: Vec<MergeRequest> = match scope {
            Some(SCOPE_ALL) => mrs.cloned().collect(),
            Some("assigned_to_me") => mrs
                .filter(|mr| me.is_some_and(|id| mr.is_assignee(id)))
                .cloned()
                .collect(),
            _ => mrs
                .filter(|mr| me.is_some() && mr.author_id() == me)
                .cloned()
                .collect(),
        };
        Ok(filtered)
    }

    async fn get_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<MergeRequest, AppError> {
        let key = Self::merge_request_key(project_id, mr_iid);
        self.enter(Operation::GetMergeRequest, Some(&key))?;

        lock(&self.fixtures)
            .merge_requests
            .iter()
            .find(|mr| mr.key() == (project_id, mr_iid))
            .cloned()
            .ok_or_else(|| AppError::not_found_with_id("Merge request", key))
    }

    async fn get_merge_request_approvals(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<Vec<User>, AppError> {
        let key = Self::merge_request_key(project_id, mr_iid);
        self.enter(Operation::GetApprovals, Some(&key))?;

        if let Some(delay) = self.approval_delay {
            tokio::time::sleep(delay).await;
        }

        Ok(lock(&self.fixtures)
            .approvals
            .get(&(project_id, mr_iid))
            .cloned()
            .unwrap_or_default())
    }

    async fn update_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
        assignee_id: Option<i64>,
        reviewer_ids: &[i64],
    ) -> Result<(), AppError> {
        let key = Self::merge_request_key(project_id, mr_iid);
        self.enter(Operation::UpdateMergeRequest, Some(&key))?;

        let assignee = assignee_id.and_then(|id| self.find_user(id));
        let reviewers: Vec<User> = reviewer_ids
            .iter()
            .filter_map(|&id| self.find_user(id))
            .collect();

        {
            let mut fixtures = lock(&self.fixtures);
            let mr = fixtures
                .merge_requests
                .iter_mut()
                .find(|mr| mr.key() == (project_id, mr_iid))
                .ok_or_else(|| AppError::not_found_with_id("Merge request", key))?;
            if assignee.is_some() {
                mr.assignee = assignee;
            }
            if !reviewers.is_empty() {
                mr.reviewers = reviewers;
            }
        }

        lock(&self.updates).push(RecordedUpdate {
            project_id,
            mr_iid,
            assignee_id,
            reviewer_ids: reviewer_ids.to_vec(),
        });
        Ok(())
    }

    async fn get_all_users(&self) -> Result<Vec<User>, AppError> {
        self.enter(Operation::GetAllUsers, None)?;
        Ok(lock(&self.fixtures).users.clone())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User, AppError> {
        self.enter(Operation::GetUserByUsername, Some(username))?;

        let fixtures = lock(&self.fixtures);
        fixtures
            .users
            .iter()
            .chain(fixtures.current_user.iter())
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| AppError::not_found_with_id("User", username))
    }

    async fn get_current_user(&self) -> Result<User, AppError> {
        self.enter(Operation::GetCurrentUser, None)?;

        lock(&self.fixtures)
            .current_user
            .clone()
            .ok_or_else(|| AppError::authentication("No current user"))
    }

    async fn list_commits(&self, project_id: i64) -> Result<Vec<Commit>, AppError> {
        self.enter(Operation::ListCommits, Some(&project_id.to_string()))?;

        Ok(lock(&self.fixtures)
            .commits
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_user_events(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, AppError> {
        self.enter(Operation::GetUserEvents, Some(&user_id.to_string()))?;

        Ok(lock(&self.fixtures)
            .events
            .get(&user_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| match e.created_at {
                        Some(at) => at >= since && until.map_or(true, |u| at < u),
                        None => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn preload_users_by_usernames(&self, _usernames: &[String]) -> Result<(), AppError> {
        self.enter(Operation::PreloadUsers, None)
    }
}

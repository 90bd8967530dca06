//! Memoizing [`Gateway`] decorator.
//!
//! Stores every user it observes in the shared [`UserCache`] and answers
//! handle lookups and directory listings from it when it can. All other
//! operations pass straight through.

use crate::error::AppError;
use crate::models::{Commit, Event, MergeRequest, Project, User};
use crate::services::fetch::{FetchOrchestrator, FetchPolicy};
use crate::services::gateway::Gateway;
use crate::services::user_cache::UserCache;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Caching wrapper around another gateway.
pub struct CachedGateway {
    inner: Arc<dyn Gateway>,
    users: Arc<UserCache>,
    fetcher: FetchOrchestrator,
}

impl CachedGateway {
    pub fn new(inner: Arc<dyn Gateway>, users: Arc<UserCache>, fetcher: FetchOrchestrator) -> Self {
        Self {
            inner,
            users,
            fetcher,
        }
    }

    /// The cache this gateway writes to.
    pub fn cache(&self) -> &Arc<UserCache> {
        &self.users
    }

    fn store_participants(&self, mr: &MergeRequest) {
        self.users.put_all(
            mr.author
                .iter()
                .chain(mr.assignee.iter())
                .chain(mr.reviewers.iter()),
        );
    }
}

#[async_trait]
impl Gateway for CachedGateway {
    async fn get_project(&self, path: &str) -> Result<Project, AppError> {
        self.inner.get_project(path).await
    }

    async fn list_merge_requests(
        &self,
        state: &str,
        scope: Option<&str>,
    ) -> Result<Vec<MergeRequest>, AppError> {
        let mrs = self.inner.list_merge_requests(state, scope).await?;
        for mr in &mrs {
            self.store_participants(mr);
        }
        Ok(mrs)
    }

    async fn get_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<MergeRequest, AppError> {
        let mr = self.inner.get_merge_request(project_id, mr_iid).await?;
        self.store_participants(&mr);
        Ok(mr)
    }

    async fn get_merge_request_approvals(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<Vec<User>, AppError> {
        let approvers = self
            .inner
            .get_merge_request_approvals(project_id, mr_iid)
            .await?;
        self.users.put_all(&approvers);
        Ok(approvers)
    }

    async fn update_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
        assignee_id: Option<i64>,
        reviewer_ids: &[i64],
    ) -> Result<(), AppError> {
        self.inner
            .update_merge_request(project_id, mr_iid, assignee_id, reviewer_ids)
            .await
    }

    async fn get_all_users(&self) -> Result<Vec<User>, AppError> {
        if !self.users.is_empty() {
            return Ok(self.users.list_all());
        }
        self.inner.get_all_users().await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User, AppError> {
        if let Some(user) = self.users.get_by_username(username) {
            return Ok(user);
        }

        let user = self.inner.get_user_by_username(username).await?;
        self.users.put(&user);
        Ok(user)
    }

    async fn get_current_user(&self) -> Result<User, AppError> {
        let user = self.inner.get_current_user().await?;
        self.users.put(&user);
        Ok(user)
    }

    async fn list_commits(&self, project_id: i64) -> Result<Vec<Commit>, AppError> {
        self.inner.list_commits(project_id).await
    }

    async fn get_user_events(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, AppError> {
        self.inner.get_user_events(user_id, since, until).await
    }

    async fn preload_users_by_usernames(&self, usernames: &[String]) -> Result<(), AppError> {
        let users = self
            .fetcher
            .fetch_all(usernames.iter().cloned(), FetchPolicy::Lenient, |name| {
                let inner = self.inner.clone();
                async move { inner.get_user_by_username(&name).await }
            })
            .await?;

        log::debug!("Preloaded {} of {} users", users.len(), usernames.len());
        self.users.put_all(users.values());
        Ok(())
    }
}

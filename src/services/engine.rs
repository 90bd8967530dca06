//! Workload and assignment engine.
//!
//! Entry points used by the webhook and any other front end. Each call
//! gathers fresh data through the [`Gateway`], so results are never stale
//! apart from users held in the shared cache.

use crate::error::AppError;
use crate::models::{Event, MergeRequest, MergeRequestWithStatus, Project, User, UserWorkload};
use crate::services::classifier::{has_approved, is_involved};
use crate::services::enricher::{enrich, sort_by_priority, RepoContext};
use crate::services::fetch::FetchOrchestrator;
use crate::services::gateway::{Gateway, SCOPE_ALL, STATE_OPENED};
use crate::services::git_context::{self, RepoContextSource};
use crate::services::issue::Issuer;
use crate::services::suggester::{self, Suggestion};
use crate::services::workload;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// The engine's entry points.
pub struct Engine {
    gateway: Arc<dyn Gateway>,
    team: Vec<String>,
    fetcher: FetchOrchestrator,
    repo: Arc<dyn RepoContextSource>,
    issuer: Option<Issuer>,
    base_url: Option<String>,
}

impl Engine {
    /// Create an engine and warm the user cache with the team.
    ///
    /// A failed warm-up is logged and otherwise ignored.
    pub async fn new(
        gateway: Arc<dyn Gateway>,
        team: Vec<String>,
        fetcher: FetchOrchestrator,
        repo: Arc<dyn RepoContextSource>,
    ) -> Self {
        if let Err(e) = gateway.preload_users_by_usernames(&team).await {
            log::warn!("Failed to preload users: {}", e);
        }

        Self {
            gateway,
            team,
            fetcher,
            repo,
            issuer: None,
            base_url: None,
        }
    }

    /// Link merge request titles to an issue tracker.
    pub fn with_issuer(mut self, issuer: Issuer) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// GitLab web root, used to read merge request URLs.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    /// Configured team handles.
    pub fn team(&self) -> &[String] {
        &self.team
    }

    /// Team workload for a project: commits and unresolved merge requests.
    pub async fn analyze_workload(&self, project_id: i64) -> Result<Vec<UserWorkload>, AppError> {
        workload::compute_team_workload(self.gateway.as_ref(), &self.fetcher, project_id, &self.team)
            .await
    }

    /// Unresolved merge requests of every team member.
    pub async fn analyze_active_mrs(&self) -> Result<Vec<UserWorkload>, AppError> {
        workload::compute_active_workload(self.gateway.as_ref(), &self.fetcher, &self.team).await
    }

    /// Unresolved merge requests of the current user.
    pub async fn analyze_my_review_workload(&self) -> Result<UserWorkload, AppError> {
        let me = self.current_user().await?;
        workload::compute_user_review_workload(self.gateway.as_ref(), &self.fetcher, me).await
    }

    /// Pick an assignee and reviewer for `mr` from `workloads`.
    pub fn suggest_assignee_and_reviewer(
        &self,
        mr: &MergeRequest,
        workloads: &[UserWorkload],
    ) -> Result<Suggestion, AppError> {
        suggester::suggest(mr, workloads)
    }

    /// Suggest people for a merge request and apply the suggestion.
    ///
    /// Nothing is written unless an assignee was found. Suggester policy
    /// errors are returned as-is so callers can tell them apart.
    pub async fn auto_assign(&self, project_id: i64, mr_iid: i64) -> Result<Suggestion, AppError> {
        let mr = self.get_merge_request(project_id, mr_iid).await?;
        let workloads = self.analyze_workload(project_id).await?;
        let suggestion = self.suggest_assignee_and_reviewer(&mr, &workloads)?;

        let Some(assignee_id) = suggestion.assignee.as_ref().map(|u| u.id) else {
            log::info!("No assignee found for MR !{} in project {}", mr_iid, project_id);
            return Ok(suggestion);
        };

        let reviewer_ids: Vec<i64> = suggestion.reviewer.iter().map(|u| u.id).collect();
        self.update_merge_request(project_id, mr_iid, Some(assignee_id), &reviewer_ids)
            .await?;

        let name = |user: &Option<User>| user.as_ref().map_or("none", |u| u.username.as_str()).to_string();
        log::info!(
            "Assigned MR !{} in project {} to {} (reviewer: {})",
            mr_iid,
            project_id,
            name(&suggestion.assignee),
            name(&suggestion.reviewer)
        );
        Ok(suggestion)
    }

    /// The caller's own open merge requests, enriched and in priority order.
    pub async fn merge_requests_with_status(&self) -> Result<Vec<MergeRequestWithStatus>, AppError> {
        let mrs = self
            .gateway
            .list_merge_requests(STATE_OPENED, None)
            .await
            .map_err(|e| e.context("Failed to get merge requests"))?;

        let context = self.repo_context().await;
        let enriched = enrich(self.gateway.as_ref(), &self.fetcher, mrs, &context, Utc::now()).await?;
        Ok(sort_by_priority(enriched))
    }

    /// Merge requests the current user still has to review, enriched and in
    /// priority order.
    pub async fn my_review_workload_with_status(
        &self,
    ) -> Result<Vec<MergeRequestWithStatus>, AppError> {
        let me = self.current_user().await?;
        let mrs = self
            .gateway
            .list_merge_requests(STATE_OPENED, Some(SCOPE_ALL))
            .await
            .map_err(|e| e.context("Failed to get merge requests"))?;

        let relevant: Vec<MergeRequest> = mrs
            .into_iter()
            .filter(|mr| is_involved(Some(mr), me.id))
            .collect();

        let context = self.repo_context().await;
        let enriched = enrich(self.gateway.as_ref(), &self.fetcher, relevant, &context, Utc::now()).await?;

        Ok(sort_by_priority(
            enriched
                .into_iter()
                .filter(|status| !has_approved(&status.approvals, me.id))
                .collect(),
        ))
    }

    /// The current user's contribution events in `[since, until)`.
    pub async fn my_activity(
        &self,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, AppError> {
        let me = self.current_user().await?;
        self.gateway
            .get_user_events(me.id, since, until)
            .await
            .map_err(|e| e.context("Failed to get user events"))
    }

    pub async fn get_project(&self, path: &str) -> Result<Project, AppError> {
        self.gateway
            .get_project(path)
            .await
            .map_err(|e| e.context("Failed to get project"))
    }

    pub async fn get_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<MergeRequest, AppError> {
        self.gateway
            .get_merge_request(project_id, mr_iid)
            .await
            .map_err(|e| e.context("Failed to get merge request"))
    }

    pub async fn list_merge_requests(
        &self,
        state: &str,
        scope: Option<&str>,
    ) -> Result<Vec<MergeRequest>, AppError> {
        self.gateway
            .list_merge_requests(state, scope)
            .await
            .map_err(|e| e.context("Failed to list merge requests"))
    }

    pub async fn get_merge_request_approvals(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<Vec<User>, AppError> {
        self.gateway
            .get_merge_request_approvals(project_id, mr_iid)
            .await
            .map_err(|e| e.context("Failed to get merge request approvals"))
    }

    pub async fn update_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
        assignee_id: Option<i64>,
        reviewer_ids: &[i64],
    ) -> Result<(), AppError> {
        self.gateway
            .update_merge_request(project_id, mr_iid, assignee_id, reviewer_ids)
            .await
            .map_err(|e| e.context("Failed to update merge request"))
    }

    /// The most recently updated open merge request of `project_id` whose
    /// source branch is `branch`.
    pub async fn merge_request_by_branch(
        &self,
        project_id: i64,
        branch: &str,
    ) -> Result<MergeRequest, AppError> {
        self.list_merge_requests(STATE_OPENED, Some(SCOPE_ALL))
            .await?
            .into_iter()
            .filter(|mr| mr.project_id == project_id && mr.source_branch == branch)
            .max_by_key(|mr| mr.updated_at)
            .ok_or_else(|| AppError::not_found_with_id("Merge request for branch", branch))
    }

    /// Project and branch of the caller's working copy.
    pub async fn current_project_info(&self) -> Result<(Project, String), AppError> {
        let working_copy = self.repo.working_copy().await?;
        let path = working_copy.project_path()?;
        let project = self.get_project(&path).await?;
        Ok((project, working_copy.branch))
    }

    /// Merge request behind a web URL such as
    /// `https://gitlab.com/group/proj/-/merge_requests/12`.
    pub async fn merge_request_from_url(&self, url: &str) -> Result<MergeRequest, AppError> {
        let base_url = self.base_url.as_deref().unwrap_or_default();
        let (path, iid) = git_context::parse_merge_request_url(base_url, url)?;
        let project = self.get_project(&path).await?;
        self.get_merge_request(project.id, iid).await
    }

    /// Issue tracker link for the merge request of the current branch.
    pub async fn current_issue_url(&self) -> Result<String, AppError> {
        let issuer = self
            .issuer
            .as_ref()
            .filter(|issuer| issuer.has_template())
            .ok_or_else(|| {
                AppError::config("Issue URL template is not configured (GG_ISSUE_URL_TEMPLATE)")
            })?;

        let (project, branch) = self.current_project_info().await?;
        let mr = self.merge_request_by_branch(project.id, &branch).await?;

        let number = issuer.extract_number(&mr.title).ok_or_else(|| {
            AppError::invalid_input(format!(
                "No issue number found in merge request title: {}",
                mr.title
            ))
        })?;

        issuer.make_url(&number).ok_or_else(|| {
            AppError::config("Issue URL template is not configured (GG_ISSUE_URL_TEMPLATE)")
        })
    }

    /// Link to open a new merge request from the current branch.
    pub async fn new_merge_request_url(&self) -> Result<String, AppError> {
        let working_copy = self.repo.working_copy().await?;
        Ok(git_context::new_merge_request_url(&working_copy))
    }

    async fn current_user(&self) -> Result<User, AppError> {
        self.gateway
            .get_current_user()
            .await
            .map_err(|e| e.context("Failed to get current user"))
    }

    /// Working copy affinity, or an empty context when it can't be determined.
    async fn repo_context(&self) -> RepoContext {
        match self.current_project_info().await {
            Ok((project, branch)) => RepoContext {
                project_id: Some(project.id),
                branch: Some(branch),
            },
            Err(e) => {
                log::debug!("No working copy context: {}", e);
                RepoContext::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::git_context::StaticRepoContext;
    use crate::services::memory_gateway::{InMemoryGateway, Operation};
    use chrono::Duration;

    fn mr(project_id: i64, iid: i64, author: &User, branch: &str) -> MergeRequest {
        let now = Utc::now();
        MergeRequest {
            id: project_id * 100 + iid,
            iid,
            title: format!("MR {}", iid),
            description: String::new(),
            web_url: String::new(),
            author: Some(author.clone()),
            assignee: None,
            reviewers: vec![],
            created_at: now,
            updated_at: now,
            project_id,
            draft: false,
            source_branch: branch.to_string(),
        }
    }

    async fn engine(gateway: Arc<InMemoryGateway>, repo: StaticRepoContext) -> Engine {
        Engine::new(
            gateway,
            vec!["alice".to_string(), "bob".to_string()],
            FetchOrchestrator::new(4),
            Arc::new(repo),
        )
        .await
    }

    #[tokio::test]
    async fn test_construction_survives_preload_failure() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.fail(Operation::PreloadUsers, || AppError::network("down"));

        let engine = engine(gateway.clone(), StaticRepoContext::none()).await;
        assert_eq!(engine.team().len(), 2);
        assert_eq!(gateway.calls(Operation::PreloadUsers), 1);
    }

    #[tokio::test]
    async fn test_merge_request_by_branch_picks_latest() {
        let author = User::new(9, "author");
        let mut older = mr(1, 1, &author, "feature");
        older.updated_at = Utc::now() - Duration::days(2);
        let newer = mr(1, 2, &author, "feature");
        let other_project = mr(2, 3, &author, "feature");

        let gateway = Arc::new(InMemoryGateway::new().with_merge_requests(vec![
            older,
            newer,
            other_project,
        ]));
        let engine = engine(gateway, StaticRepoContext::none()).await;

        assert_eq!(engine.merge_request_by_branch(1, "feature").await.unwrap().iid, 2);
        let err = engine.merge_request_by_branch(1, "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_current_project_info_from_working_copy() {
        let gateway = Arc::new(InMemoryGateway::new().with_project(Project {
            id: 5,
            path: "group/proj".into(),
        }));
        let engine = engine(
            gateway,
            StaticRepoContext::new("git@gitlab.com:group/proj.git", "feature"),
        )
        .await;

        let (project, branch) = engine.current_project_info().await.unwrap();
        assert_eq!(project.id, 5);
        assert_eq!(branch, "feature");
        assert!(engine
            .new_merge_request_url()
            .await
            .unwrap()
            .ends_with("source_branch]=feature"));
    }

    #[tokio::test]
    async fn test_my_merge_requests_prioritized() {
        let me = User::new(1, "me");
        let gateway = Arc::new(
            InMemoryGateway::new()
                .with_current_user(me.clone())
                .with_project(Project {
                    id: 5,
                    path: "group/proj".into(),
                })
                .with_merge_requests(vec![
                    mr(6, 1, &me, "other"),
                    mr(5, 2, &me, "other"),
                    mr(6, 3, &me, "feature"),
                    mr(5, 4, &User::new(2, "someone"), "feature"),
                ]),
        );
        let engine = engine(
            gateway,
            StaticRepoContext::new("https://gitlab.com/group/proj.git", "feature"),
        )
        .await;

        let statuses = engine.merge_requests_with_status().await.unwrap();
        let iids: Vec<i64> = statuses.iter().map(|s| s.merge_request.iid).collect();
        assert_eq!(iids[0], 3);
        assert_eq!(iids[1], 2);
        assert_eq!(iids.len(), 3);
        assert!(statuses[0].is_current_branch);
        assert!(!statuses[0].is_current_project);
    }

    #[tokio::test]
    async fn test_auto_assign_does_not_write_without_assignee() {
        let alice = User::new(1, "alice");
        let gateway = Arc::new(
            InMemoryGateway::new()
                .with_users(vec![alice.clone()])
                .with_merge_requests(vec![mr(1, 1, &alice, "feature")]),
        );
        let engine = engine(gateway.clone(), StaticRepoContext::none()).await;

        let suggestion = engine.auto_assign(1, 1).await.unwrap();
        assert!(suggestion.assignee.is_none());
        assert!(gateway.updates().is_empty());
    }

    #[tokio::test]
    async fn test_auto_assign_policy_error_blocks_write() {
        let alice = User::new(1, "alice").with_status("on vacation", "");
        let gateway = Arc::new(
            InMemoryGateway::new()
                .with_users(vec![alice])
                .with_merge_requests(vec![mr(1, 1, &User::new(3, "carol"), "feature")]),
        );
        let engine = engine(gateway.clone(), StaticRepoContext::none()).await;

        let err = engine.auto_assign(1, 1).await.unwrap_err();
        assert!(err.is_policy());
        assert!(gateway.updates().is_empty());
    }

    #[tokio::test]
    async fn test_merge_request_from_url() {
        let author = User::new(9, "author");
        let gateway = Arc::new(
            InMemoryGateway::new()
                .with_project(Project {
                    id: 5,
                    path: "group/proj".into(),
                })
                .with_merge_requests(vec![mr(5, 12, &author, "feature")]),
        );
        let engine = engine(gateway, StaticRepoContext::none())
            .await
            .with_base_url("https://gitlab.example.com/");

        let found = engine
            .merge_request_from_url("https://gitlab.example.com/group/proj/-/merge_requests/12/diffs")
            .await
            .unwrap();
        assert_eq!((found.project_id, found.iid), (5, 12));

        let err = engine
            .merge_request_from_url("https://gitlab.example.com/group/other/-/merge_requests/12")
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = engine
            .merge_request_from_url("https://gitlab.example.com/group/proj")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { .. }));
    }

    fn issue_fixture(title: &str) -> Arc<InMemoryGateway> {
        let mut current = mr(5, 3, &User::new(9, "author"), "feature");
        current.title = title.to_string();
        Arc::new(
            InMemoryGateway::new()
                .with_project(Project {
                    id: 5,
                    path: "group/proj".into(),
                })
                .with_merge_requests(vec![current]),
        )
    }

    fn working_copy() -> StaticRepoContext {
        StaticRepoContext::new("git@gitlab.com:group/proj.git", "feature")
    }

    #[tokio::test]
    async fn test_current_issue_url() {
        let issuer = Issuer::new(Some("https://jira.example.com/browse/{{.Issue}}")).unwrap();
        let engine = engine(issue_fixture("PROJ-42: tidy login"), working_copy())
            .await
            .with_issuer(issuer);

        assert_eq!(
            engine.current_issue_url().await.unwrap(),
            "https://jira.example.com/browse/PROJ-42"
        );
    }

    #[tokio::test]
    async fn test_current_issue_url_without_key_in_title() {
        let issuer = Issuer::new(Some("https://jira.example.com/browse/{{.Issue}}")).unwrap();
        let engine = engine(issue_fixture("tidy login"), working_copy())
            .await
            .with_issuer(issuer);

        let err = engine.current_issue_url().await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { .. }));
        assert!(err.to_string().contains("tidy login"));
    }

    #[tokio::test]
    async fn test_current_issue_url_requires_template() {
        let gateway = issue_fixture("PROJ-42: tidy login");
        let engine = engine(gateway.clone(), working_copy()).await;
        let err = engine.current_issue_url().await.unwrap_err();
        assert!(matches!(err, AppError::Config { .. }));
        assert!(err.to_string().contains("GG_ISSUE_URL_TEMPLATE"));

        let engine = engine_with_issuer(gateway).await;
        let err = engine.current_issue_url().await.unwrap_err();
        assert!(matches!(err, AppError::Config { .. }));
    }

    async fn engine_with_issuer(gateway: Arc<InMemoryGateway>) -> Engine {
        engine(gateway, working_copy())
            .await
            .with_issuer(Issuer::new(None).unwrap())
    }
}

//! GitLab API client.
//!
//! Provides HTTP client for GitLab API v4 with authentication and pagination.
//! Responses are returned as raw API types; conversion into domain models
//! happens in the gateway.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Page size used for every list request (GitLab maximum).
pub const PER_PAGE: u32 = 100;

/// GitLab API client configuration.
#[derive(Debug, Clone)]
pub struct GitLabClientConfig {
    /// Base URL of the GitLab instance (e.g., `https://gitlab.com`).
    pub base_url: String,

    /// Personal access token for authentication.
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Upper bound on pages read by [`GitLabClient::get_all_pages`].
    pub max_pages: u32,
}

impl Default for GitLabClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            timeout_secs: 30,
            max_pages: 1,
        }
    }
}

/// GitLab API client.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    client: Client,
    config: GitLabClientConfig,
}

/// Pagination information from GitLab API response headers.
#[derive(Debug, Clone, Default)]
pub struct PaginationInfo {
    /// Current page number.
    pub page: u32,

    /// Next page number (if any).
    pub next_page: Option<u32>,
}

/// Query parameters for listing merge requests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeRequestsQuery {
    /// Filter by state: `opened`, `merged`, `closed`, `all`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Filter by scope: `created_by_me`, `assigned_to_me`, `all`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// GitLab user from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabUser {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub name: String,
    /// Only present for administrators or the token owner.
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub public_email: Option<String>,
}

impl GitLabUser {
    /// Best available email: private email first, then the public one.
    pub fn best_email(&self) -> Option<String> {
        self.email
            .clone()
            .filter(|e| !e.is_empty())
            .or_else(|| self.public_email.clone().filter(|e| !e.is_empty()))
    }
}

/// GitLab user status from API (`/users/:id/status`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitLabUserStatus {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub availability: Option<String>,
}

/// GitLab merge request from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabMergeRequest {
    pub id: i64,
    pub iid: i64,
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub web_url: String,
    pub source_branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: GitLabUser,
    pub assignee: Option<GitLabUser>,
    pub reviewers: Option<Vec<GitLabUser>>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub work_in_progress: bool,
}

impl GitLabMergeRequest {
    /// IDs of every participant (author, assignee, reviewers).
    pub fn participant_ids(&self) -> Vec<i64> {
        let mut ids = vec![self.author.id];
        ids.extend(self.assignee.iter().map(|u| u.id));
        ids.extend(self.reviewers.iter().flatten().map(|u| u.id));
        ids
    }
}

/// Response from the MR approvals endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequestApprovals {
    #[serde(default)]
    pub approved_by: Vec<ApprovedBy>,
}

/// User who approved an MR.
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovedBy {
    pub user: GitLabUser,
}

/// GitLab project from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabProject {
    pub id: i64,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub path_with_namespace: String,
}

/// GitLab commit from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabCommit {
    pub id: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_email: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub web_url: String,
}

/// Push details attached to push events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitLabPushData {
    #[serde(default)]
    pub commit_count: i64,
    #[serde(default)]
    pub action: String,
    #[serde(rename = "ref", default)]
    pub ref_name: Option<String>,
    #[serde(default)]
    pub commit_title: Option<String>,
}

/// Note attached to comment events.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabEventNote {
    pub id: i64,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub noteable_type: Option<String>,
    #[serde(default)]
    pub noteable_iid: Option<i64>,
}

/// Contribution event from API (`/users/:id/events`).
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabEvent {
    pub id: i64,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub action_name: String,
    #[serde(default)]
    pub target_id: Option<i64>,
    #[serde(default)]
    pub target_iid: Option<i64>,
    #[serde(default)]
    pub target_type: Option<String>,
    #[serde(default)]
    pub target_title: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub push_data: Option<GitLabPushData>,
    #[serde(default)]
    pub note: Option<GitLabEventNote>,
}

impl GitLabClient {
    /// Create a new GitLab client.
    pub fn new(config: GitLabClientConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();

        // Add the private token header for authentication
        let token_value = header::HeaderValue::from_str(&config.token)
            .map_err(|_| AppError::authentication("Invalid token format"))?;
        headers.insert("PRIVATE-TOKEN", token_value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Base URL of the instance, without trailing slash.
    pub fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Get the base URL for API requests.
    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url(), path)
    }

    /// Parse pagination headers from response.
    fn parse_pagination(response: &Response) -> PaginationInfo {
        let headers = response.headers();

        let get_header = |name: &str| -> Option<u32> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
        };

        PaginationInfo {
            page: get_header("x-page").unwrap_or(1),
            next_page: get_header("x-next-page"),
        }
    }

    /// Handle API response errors.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
    ) -> Result<T, AppError> {
        let status = response.status();

        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| AppError::internal(format!("Failed to parse response: {}", e)))
        } else {
            Err(Self::error_for_status(response, endpoint).await)
        }
    }

    /// Build an error from a non-success response.
    async fn error_for_status(response: Response, endpoint: &str) -> AppError {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            // 401 Unauthorized - token is expired or revoked
            return AppError::authentication_expired("GitLab token expired or revoked");
        }

        let body = response.text().await.unwrap_or_default();
        let body_message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                // GitLab returns errors as {"message": "..."} or {"error": "..."}
                v.get("message").or_else(|| v.get("error")).map(|m| match m.as_str() {
                    Some(s) => s.to_string(),
                    None => m.to_string(),
                })
            });

        match (status, body_message) {
            (StatusCode::NOT_FOUND, _) => AppError::not_found_with_id("Resource", endpoint),
            (StatusCode::FORBIDDEN, _) => {
                AppError::gitlab_api_full("Access denied", status.as_u16(), endpoint)
            }
            (StatusCode::TOO_MANY_REQUESTS, _) => {
                AppError::gitlab_api_full("Rate limit exceeded", status.as_u16(), endpoint)
            }
            (_, Some(msg)) => AppError::gitlab_api_full(msg, status.as_u16(), endpoint),
            _ => AppError::gitlab_api_full(
                format!("Request failed ({}): {}", status.as_u16(), body),
                status.as_u16(),
                endpoint,
            ),
        }
    }

    /// GET a single resource.
    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, AppError> {
        let url = self.api_url(endpoint);
        let response = self.client.get(&url).query(query).send().await?;
        self.handle_response(response, endpoint).await
    }

    /// Fetch pages of a paginated endpoint, stopping after `max_pages`.
    pub async fn get_all_pages<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: Option<&impl Serialize>,
    ) -> Result<Vec<T>, AppError> {
        let mut all_data = Vec::new();
        let mut page = 1u32;
        let max_pages = self.config.max_pages.max(1);

        for fetched in 1..=max_pages {
            let url = self.api_url(endpoint);
            let mut request = self.client.get(&url);

            if let Some(q) = query {
                request = request.query(q);
            }

            request = request.query(&[
                ("page", page.to_string()),
                ("per_page", PER_PAGE.to_string()),
            ]);

            let response = request.send().await?;
            let pagination = Self::parse_pagination(&response);
            let data = self.handle_response::<Vec<T>>(response, endpoint).await?;

            all_data.extend(data);

            match pagination.next_page {
                Some(next) if next > pagination.page => {
                    if fetched == max_pages {
                        log::debug!(
                            "[gitlab] {} has more pages, stopping at {}",
                            endpoint,
                            max_pages
                        );
                        break;
                    }
                    page = next;
                }
                _ => break,
            }
        }

        Ok(all_data)
    }

    /// Fetch the user the token belongs to.
    pub async fn current_user(&self) -> Result<GitLabUser, AppError> {
        self.get("/user", &[]).await
    }

    /// Fetch a user by ID.
    pub async fn get_user(&self, user_id: i64) -> Result<GitLabUser, AppError> {
        self.get(&format!("/users/{}", user_id), &[]).await
    }

    /// Fetch a user's availability status.
    pub async fn get_user_status(&self, user_id: i64) -> Result<GitLabUserStatus, AppError> {
        self.get(&format!("/users/{}/status", user_id), &[]).await
    }

    /// Look up users by exact handle (0 or 1 result).
    pub async fn find_users_by_username(
        &self,
        username: &str,
    ) -> Result<Vec<GitLabUser>, AppError> {
        self.get("/users", &[("username", username.to_string())])
            .await
    }

    /// List every active human user.
    pub async fn list_users(&self) -> Result<Vec<GitLabUser>, AppError> {
        self.get_all_pages("/users", Some(&[("active", "true"), ("humans", "true")]))
            .await
    }

    /// Get a single project by path with namespace or ID.
    pub async fn get_project(&self, path: &str) -> Result<GitLabProject, AppError> {
        let encoded = urlencoding::encode(path);
        self.get(&format!("/projects/{}", encoded), &[]).await
    }

    /// List merge requests across every page.
    pub async fn list_merge_requests(
        &self,
        query: &MergeRequestsQuery,
    ) -> Result<Vec<GitLabMergeRequest>, AppError> {
        self.get_all_pages("/merge_requests", Some(query)).await
    }

    /// Get a single merge request by project and IID.
    pub async fn get_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<GitLabMergeRequest, AppError> {
        self.get(
            &format!("/projects/{}/merge_requests/{}", project_id, mr_iid),
            &[],
        )
        .await
    }

    /// Get approval status for a merge request.
    pub async fn get_mr_approvals(
        &self,
        project_id: i64,
        mr_iid: i64,
    ) -> Result<MergeRequestApprovals, AppError> {
        self.get(
            &format!("/projects/{}/merge_requests/{}/approvals", project_id, mr_iid),
            &[],
        )
        .await
    }

    /// Update the assignee and reviewers of a merge request.
    ///
    /// Omitted fields are left unchanged on the server.
    pub async fn update_merge_request(
        &self,
        project_id: i64,
        mr_iid: i64,
        assignee_id: Option<i64>,
        reviewer_ids: &[i64],
    ) -> Result<(), AppError> {
        #[derive(Serialize)]
        struct Body<'a> {
            #[serde(skip_serializing_if = "Option::is_none")]
            assignee_id: Option<i64>,
            #[serde(skip_serializing_if = "<[i64]>::is_empty")]
            reviewer_ids: &'a [i64],
        }

        let endpoint = format!("/projects/{}/merge_requests/{}", project_id, mr_iid);
        let url = self.api_url(&endpoint);
        let response = self
            .client
            .put(&url)
            .json(&Body {
                assignee_id,
                reviewer_ids,
            })
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_for_status(response, &endpoint).await)
        }
    }

    /// List the most recent commits of a project's default branch.
    pub async fn list_commits(&self, project_id: i64) -> Result<Vec<GitLabCommit>, AppError> {
        self.get(
            &format!("/projects/{}/repository/commits", project_id),
            &[("per_page", PER_PAGE.to_string())],
        )
        .await
    }

    /// List a user's contribution events in a date window.
    ///
    /// GitLab treats `after`/`before` as exclusive dates.
    pub async fn list_user_events(
        &self,
        user_id: i64,
        after: DateTime<Utc>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<GitLabEvent>, AppError> {
        let mut query = vec![("after", after.format("%Y-%m-%d").to_string())];
        if let Some(before) = before {
            query.push(("before", before.format("%Y-%m-%d").to_string()));
        }

        self.get_all_pages(&format!("/users/{}/events", user_id), Some(&query))
            .await
    }
}

//! Local working copy inspection and GitLab URL helpers.

use crate::error::AppError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

const MERGE_REQUESTS_SEGMENT: &str = "/-/merge_requests/";

/// Remote and branch of a local clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopy {
    /// URL of the `origin` remote as configured.
    pub remote_url: String,

    /// Checked-out branch name.
    pub branch: String,
}

impl WorkingCopy {
    /// Project path with namespace, derived from the remote URL.
    pub fn project_path(&self) -> Result<String, AppError> {
        parse_project_path(&self.remote_url)
    }
}

/// Source of the caller's working copy.
#[async_trait]
pub trait RepoContextSource: Send + Sync {
    async fn working_copy(&self) -> Result<WorkingCopy, AppError>;
}

/// Reads the working copy of a directory with the `git` binary.
#[derive(Debug, Clone)]
pub struct GitWorkingCopy {
    dir: PathBuf,
}

impl GitWorkingCopy {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn git(&self, args: &[&str]) -> Result<String, AppError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()
            .await
            .map_err(|e| AppError::internal(format!("Failed to spawn git {:?}: {}", args, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::invalid_input(format!(
                "git {:?} failed: {}",
                args,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl RepoContextSource for GitWorkingCopy {
    async fn working_copy(&self) -> Result<WorkingCopy, AppError> {
        let remote_url = self
            .git(&["remote", "get-url", "origin"])
            .await
            .map_err(|e| e.context("Failed to get remote URL"))?;

        let branch = self.git(&["branch", "--show-current"]).await?;
        if branch.is_empty() {
            return Err(AppError::invalid_input_field(
                "Failed to get current branch",
                "branch",
            ));
        }

        Ok(WorkingCopy { remote_url, branch })
    }
}

/// Fixed working copy, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticRepoContext {
    working_copy: Option<WorkingCopy>,
}

impl StaticRepoContext {
    /// A source that is never inside a clone.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(remote_url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            working_copy: Some(WorkingCopy {
                remote_url: remote_url.into(),
                branch: branch.into(),
            }),
        }
    }
}

#[async_trait]
impl RepoContextSource for StaticRepoContext {
    async fn working_copy(&self) -> Result<WorkingCopy, AppError> {
        self.working_copy
            .clone()
            .ok_or_else(|| AppError::invalid_input("Not inside a repository clone"))
    }
}

/// Project path from a remote URL.
///
/// `git@host:group/proj.git` yields `group/proj`; HTTP(S) remotes yield their
/// last two path segments.
pub fn parse_project_path(remote_url: &str) -> Result<String, AppError> {
    let trimmed = remote_url.trim();
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    if trimmed.starts_with("git@") {
        let parts: Vec<&str> = trimmed.split(':').collect();
        return match parts.as_slice() {
            [_, path] if !path.is_empty() => Ok(path.to_string()),
            _ => Err(AppError::invalid_input_field(
                "Invalid SSH remote URL format",
                "remote_url",
            )),
        };
    }

    let parts: Vec<&str> = trimmed.split('/').collect();
    match parts.as_slice() {
        [.., namespace, project] if !namespace.is_empty() && !project.is_empty() => {
            Ok(format!("{}/{}", namespace, project))
        }
        _ => Err(AppError::invalid_input_field(
            "Invalid HTTPS remote URL format",
            "remote_url",
        )),
    }
}

/// Web URL of a remote, rewriting SSH remotes to HTTPS.
fn remote_web_url(remote_url: &str) -> String {
    let trimmed = remote_url.trim();
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    match trimmed.strip_prefix("git@").and_then(|rest| rest.split_once(':')) {
        Some((host, path)) => format!("https://{}/{}", host, path),
        None => trimmed.to_string(),
    }
}

/// Link that opens the "new merge request" form for the working copy's branch.
pub fn new_merge_request_url(working_copy: &WorkingCopy) -> String {
    format!(
        "{}/-/merge_requests/new?merge_request[source_branch]={}",
        remote_web_url(&working_copy.remote_url),
        urlencoding::encode(&working_copy.branch)
    )
}

/// Split a merge request web URL into project path and IID.
///
/// Anything after the IID (`/diffs`, `#note_1`, a query) is ignored.
pub fn parse_merge_request_url(base_url: &str, url: &str) -> Result<(String, i64), AppError> {
    let (project, rest) = url
        .split_once(MERGE_REQUESTS_SEGMENT)
        .ok_or_else(|| AppError::invalid_input_field("Invalid merge request URL format", "url"))?;

    let prefix = format!("{}/", base_url.trim_end_matches('/'));
    let project = project.strip_prefix(&prefix).unwrap_or(project);

    let iid_str = rest
        .split(|c: char| c == '/' || c == '#' || c == '?')
        .next()
        .unwrap_or_default();
    let iid = iid_str.parse::<i64>().map_err(|_| {
        AppError::invalid_input_field(format!("Invalid merge request ID: {}", iid_str), "url")
    })?;

    Ok((project.to_string(), iid))
}

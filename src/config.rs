//! Runtime configuration loaded from environment variables.

use crate::error::AppError;

/// Default GitLab instance.
pub const DEFAULT_BASE_URL: &str = "https://gitlab.com";

/// Default webhook listen address.
pub const DEFAULT_WEBHOOK_ADDRESS: &str = "0.0.0.0:8080";

/// Default cap on concurrent remote lookups per batch.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of pages read from a paginated listing.
pub const DEFAULT_MAX_PAGES: u32 = 1;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the GitLab instance.
    pub base_url: String,

    /// Personal access token.
    pub token: String,

    /// Handles of the team members considered for assignment.
    pub team_users: Vec<String>,

    /// Address the webhook server binds to.
    pub webhook_address: String,

    /// Maximum number of in-flight lookups per batch.
    pub fetch_concurrency: usize,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Pages read from the user directory and merge request listings.
    pub max_pages: u32,

    /// Issue tracker link template, e.g. `https://jira.example.com/browse/{{.Issue}}`.
    pub issue_url_template: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: String::new(),
            team_users: Vec::new(),
            webhook_address: DEFAULT_WEBHOOK_ADDRESS.to_string(),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_pages: DEFAULT_MAX_PAGES,
            issue_url_template: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let token = get("GG_TOKEN")
            .ok_or_else(|| AppError::config("GG_TOKEN environment variable is required"))?;

        let team = get("GG_TEAM")
            .ok_or_else(|| AppError::config("GG_TEAM environment variable is required"))?;
        let team_users = parse_team(&team);
        if team_users.is_empty() {
            return Err(AppError::config("GG_TEAM must name at least one user"));
        }

        let fetch_concurrency = match get("GG_FETCH_CONCURRENCY") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(AppError::config(format!(
                        "GG_FETCH_CONCURRENCY must be a positive integer, got '{}'",
                        raw
                    )))
                }
            },
            None => DEFAULT_FETCH_CONCURRENCY,
        };

        let timeout_secs = match get("GG_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                AppError::config(format!("GG_TIMEOUT_SECS must be an integer, got '{}'", raw))
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let max_pages = match get("GG_MAX_PAGES") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(AppError::config(format!(
                        "GG_MAX_PAGES must be a positive integer, got '{}'",
                        raw
                    )))
                }
            },
            None => DEFAULT_MAX_PAGES,
        };

        Ok(Self {
            base_url: get("GG_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            token,
            team_users,
            webhook_address: get("GG_WEBHOOK_ADDRESS")
                .unwrap_or_else(|| DEFAULT_WEBHOOK_ADDRESS.to_string()),
            fetch_concurrency,
            timeout_secs,
            max_pages,
            issue_url_template: get("GG_ISSUE_URL_TEMPLATE"),
        })
    }

    /// Address to bind the webhook listener to.
    ///
    /// A bare `:PORT` binds on all interfaces. Host names are resolved when
    /// binding.
    pub fn webhook_bind_address(&self) -> Result<String, AppError> {
        let address = self.webhook_address.trim();
        let (host, port) = address.rsplit_once(':').ok_or_else(|| {
            AppError::invalid_input_field(
                format!("Invalid webhook address '{}': missing port", self.webhook_address),
                "GG_WEBHOOK_ADDRESS",
            )
        })?;

        if port.parse::<u16>().is_err() {
            return Err(AppError::invalid_input_field(
                format!("Invalid webhook address '{}': bad port", self.webhook_address),
                "GG_WEBHOOK_ADDRESS",
            ));
        }

        if host.is_empty() {
            Ok(format!("0.0.0.0:{}", port))
        } else {
            Ok(address.to_string())
        }
    }
}

/// Split a comma-separated team list, trimming entries and dropping blanks.
fn parse_team(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

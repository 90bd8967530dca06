//! Application error types.
//!
//! These errors are serializable so the webhook endpoint can return them
//! as structured JSON, and they carry enough context (endpoint, status code,
//! sub-operation) to be logged meaningfully by the caller.

use serde::Serialize;
use thiserror::Error;

/// Application-level errors returned by the engine and its gateways.
///
/// All variants serialize to a structured JSON object.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// GitLab API request failed.
    #[error("GitLab API error: {message}")]
    GitLabApi {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// Network request failed.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Authentication failed or credentials invalid.
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Authentication token expired or revoked.
    #[error("Token expired: {message}")]
    AuthenticationExpired { message: String },

    /// Requested resource not found.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Invalid input provided.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// Configuration missing or malformed.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The workload list handed to the suggester was empty.
    #[error("No team members available")]
    NoTeamMembers,

    /// Every team member failed the availability check.
    #[error("No available team members")]
    NoAvailableTeamMembers,

    /// The batch was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a GitLab API error.
    pub fn gitlab_api(message: impl Into<String>) -> Self {
        Self::GitLabApi {
            message: message.into(),
            status_code: None,
            endpoint: None,
        }
    }

    /// Create a GitLab API error with status code and endpoint.
    pub fn gitlab_api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::GitLabApi {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create an authentication expired error.
    pub fn authentication_expired(message: impl Into<String>) -> Self {
        Self::AuthenticationExpired {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    /// Create an invalid input error with field name.
    pub fn invalid_input_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Prefix the message with the sub-operation that failed.
    ///
    /// The variant is preserved so callers can still match on it. Unit
    /// variants carry no message and are returned unchanged.
    pub fn context(self, operation: &str) -> Self {
        let prefix = |message: String| format!("{}: {}", operation, message);
        match self {
            Self::GitLabApi {
                message,
                status_code,
                endpoint,
            } => Self::GitLabApi {
                message: prefix(message),
                status_code,
                endpoint,
            },
            Self::Network { message } => Self::Network {
                message: prefix(message),
            },
            Self::Authentication { message } => Self::Authentication {
                message: prefix(message),
            },
            Self::AuthenticationExpired { message } => Self::AuthenticationExpired {
                message: prefix(message),
            },
            Self::NotFound { resource, id } => Self::NotFound {
                resource: prefix(resource),
                id,
            },
            Self::InvalidInput { message, field } => Self::InvalidInput {
                message: prefix(message),
                field,
            },
            Self::Config { message } => Self::Config {
                message: prefix(message),
            },
            Self::Internal { message } => Self::Internal {
                message: prefix(message),
            },
            other @ (Self::NoTeamMembers | Self::NoAvailableTeamMembers | Self::Cancelled) => other,
        }
    }

    /// Whether this error must abort a batch even under the lenient policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::AuthenticationExpired { .. } | Self::Cancelled
        )
    }

    /// Whether this is a business-rule failure from the suggester.
    pub fn is_policy(&self) -> bool {
        matches!(self, Self::NoTeamMembers | Self::NoAvailableTeamMembers)
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// Conversions from common error types

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network("Request timed out")
        } else if err.is_connect() {
            Self::network("Failed to connect to server")
        } else if err.is_status() {
            Self::gitlab_api(format!("HTTP error: {}", err))
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gitlab_api_error_full() {
        let err = AppError::gitlab_api_full("Not Found", 404, "/api/v4/merge_requests");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"status_code\":404"));
        assert!(json.contains("/api/v4/merge_requests"));
    }

    #[test]
    fn test_not_found_with_id() {
        let err = AppError::not_found_with_id("User", "alice");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"resource\":\"User\""));
        assert!(json.contains("\"id\":\"alice\""));
    }

    #[test]
    fn test_policy_errors_serialize_with_type_tag() {
        let json = serde_json::to_string(&AppError::NoAvailableTeamMembers).unwrap();
        assert!(json.contains("\"type\":\"NoAvailableTeamMembers\""));
        assert!(AppError::NoTeamMembers.is_policy());
        assert!(!AppError::NoTeamMembers.is_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(AppError::authentication_expired("revoked").is_fatal());
        assert!(AppError::Cancelled.is_fatal());
        assert!(!AppError::not_found("User").is_fatal());
        assert!(!AppError::network("reset").is_fatal());
    }

    #[test]
    fn test_context_prefixes_message() {
        let err = AppError::gitlab_api_full("Access denied", 403, "/projects/1").context("Failed to list commits");
        assert_eq!(
            err.to_string(),
            "GitLab API error: Failed to list commits: Access denied"
        );

        let err = AppError::not_found("Project").context("Failed to get project");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: Failed to get project: Project");
    }

    #[test]
    fn test_context_keeps_variant_and_adds_operation() {
        let err = AppError::authentication_expired("GitLab token expired or revoked")
            .context("Failed to get MR approvals");
        assert!(err.is_fatal());
        assert!(matches!(err, AppError::AuthenticationExpired { .. }));
        assert!(err.to_string().contains("Failed to get MR approvals"));

        let err = AppError::invalid_input_field("bad port", "GG_WEBHOOK_ADDRESS").context("Failed to start");
        assert!(matches!(
            err,
            AppError::InvalidInput { ref field, .. } if field.as_deref() == Some("GG_WEBHOOK_ADDRESS")
        ));
        assert_eq!(err.to_string(), "Invalid input: Failed to start: bad port");

        let err = AppError::config("missing token").context("Failed to load");
        assert_eq!(err.to_string(), "Configuration error: Failed to load: missing token");

        let err = AppError::Cancelled.context("Failed to get users");
        assert!(matches!(err, AppError::Cancelled));
    }

    #[test]
    fn test_display_impl() {
        let err = AppError::authentication("invalid token");
        assert_eq!(format!("{}", err), "Authentication error: invalid token");
        assert_eq!(
            AppError::NoTeamMembers.to_string(),
            "No team members available"
        );
    }
}

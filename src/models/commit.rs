//! Commit model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A repository commit. Only counted in aggregate per attributed user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit SHA.
    pub id: String,
    pub author_name: String,
    pub author_email: String,
    pub created_at: DateTime<Utc>,
    pub message: String,
    pub web_url: String,
}

//! Activity event model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A contribution event attributed to one user.
///
/// Push- and note-specific fields are empty/zero for other event kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,

    /// Action name as reported by GitLab (e.g. `opened`, `pushed to`, `commented on`).
    pub action: String,

    pub target_type: String,
    pub target_title: String,
    pub target_id: i64,
    pub project_id: i64,

    /// Path with namespace; empty if the project could not be resolved.
    pub project_path: String,

    pub created_at: Option<DateTime<Utc>>,

    /// Derived link to the event target; empty when none can be built.
    pub web_url: String,

    pub push_ref: String,
    pub push_action: String,
    pub commit_count: i64,
    pub commit_title: String,

    pub note_body: String,
    pub noteable_type: String,
}

impl Event {
    /// Whether this is a push event.
    pub fn is_push(&self) -> bool {
        !self.push_ref.is_empty()
    }

    /// Whether this is a comment event.
    pub fn is_note(&self) -> bool {
        !self.noteable_type.is_empty()
    }
}

//! Project model.

use serde::{Deserialize, Serialize};

/// A project, used as a join key for merge requests and commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,

    /// Path with namespace (e.g., "group/project").
    pub path: String,
}

//! Assignee and reviewer selection.

use crate::error::AppError;
use crate::models::{MergeRequest, User, UserWorkload};
use crate::services::classifier::is_available;
use serde::Serialize;

/// Suggested people for a merge request.
///
/// The reviewer may be absent when only one eligible member exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub assignee: Option<User>,
    pub reviewer: Option<User>,
}

/// Bandwidth score: historical commits relative to current load.
///
/// Higher means more room to take one more merge request.
pub fn calculate_score(commits: usize, mr_count: usize) -> f64 {
    commits as f64 / (1.0 + mr_count as f64)
}

/// Pick an assignee by score and a reviewer by lowest load.
///
/// Neither pick is ever the author, and the reviewer is never the assignee.
/// Ties keep the input order.
pub fn suggest(mr: &MergeRequest, workloads: &[UserWorkload]) -> Result<Suggestion, AppError> {
    if workloads.is_empty() {
        return Err(AppError::NoTeamMembers);
    }

    let mut available: Vec<&UserWorkload> =
        workloads.iter().filter(|w| is_available(&w.user)).collect();
    if available.is_empty() {
        return Err(AppError::NoAvailableTeamMembers);
    }

    let author_id = mr.author_id();

    // `sort_by` is stable.
    available.sort_by(|a, b| {
        calculate_score(b.commits, b.mr_count).total_cmp(&calculate_score(a.commits, a.mr_count))
    });
    let assignee = available
        .iter()
        .find(|w| author_id != Some(w.user.id))
        .map(|w| w.user.clone());

    available.sort_by_key(|w| w.mr_count);
    let assignee_id = assignee.as_ref().map(|u| u.id);
    let reviewer = available
        .iter()
        .find(|w| author_id != Some(w.user.id) && assignee_id != Some(w.user.id))
        .map(|w| w.user.clone());

    Ok(Suggestion { assignee, reviewer })
}

//! Involvement, approval and availability checks.

use crate::models::{MergeRequest, User};

/// Whether `user_id` is meaningfully attached to the merge request.
///
/// Drafts and the user's own merge requests never count, even if the
/// author also appears as assignee or reviewer.
pub fn is_involved(mr: Option<&MergeRequest>, user_id: i64) -> bool {
    let Some(mr) = mr else {
        return false;
    };

    if mr.draft || mr.author_id() == Some(user_id) {
        return false;
    }

    mr.is_assignee(user_id) || mr.is_reviewer(user_id)
}

/// Whether `user_id` appears among the approvers.
pub fn has_approved(approvals: &[User], user_id: i64) -> bool {
    approvals.iter().any(|u| u.id == user_id)
}

/// Heuristic availability gate based on the user's published status.
///
/// A status message mentioning "ooo" or "vacation", or an availability of
/// "busy", marks the user unavailable. Comparisons ignore case.
pub fn is_available(user: &User) -> bool {
    let message = user.status.message.to_lowercase();
    let availability = user.status.availability.to_lowercase();

    !message.contains("ooo") && !message.contains("vacation") && availability != "busy"
}

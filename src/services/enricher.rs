//! Merge request status enrichment and display ordering.

use crate::error::AppError;
use crate::models::{MergeRequest, MergeRequestWithStatus, User};
use crate::services::fetch::{FetchOrchestrator, FetchPolicy};
use crate::services::gateway::Gateway;
use crate::services::workload::fetch_approvals;
use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use std::cmp::Ordering;

/// Working days without an update before a merge request counts as stalled.
pub const STALE_AFTER_WORKING_DAYS: u32 = 3;

/// Where the caller is working, if known.
///
/// Both fields are `None` outside a repository clone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoContext {
    pub project_id: Option<i64>,
    pub branch: Option<String>,
}

/// Step back `days` working days, skipping Saturdays and Sundays one
/// calendar day at a time. The time of day is kept.
pub fn subtract_working_days(date: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    let mut result = date;
    let mut subtracted = 0;

    while subtracted < days {
        result -= Duration::days(1);
        if !matches!(result.weekday(), Weekday::Sat | Weekday::Sun) {
            subtracted += 1;
        }
    }

    result
}

/// Attach approvals, staleness and affinity flags to a merge request.
pub fn with_status(
    merge_request: MergeRequest,
    approvals: Vec<User>,
    context: &RepoContext,
    stale_before: DateTime<Utc>,
) -> MergeRequestWithStatus {
    let is_stalled = merge_request.updated_at < stale_before;
    let is_current_branch = context
        .branch
        .as_deref()
        .is_some_and(|b| !b.is_empty() && merge_request.source_branch == b);
    let is_current_project = context
        .project_id
        .is_some_and(|id| merge_request.project_id == id);

    MergeRequestWithStatus {
        approval_count: approvals.len(),
        approvals,
        is_stalled,
        is_current_branch,
        is_current_project,
        merge_request,
    }
}

/// Enrich every merge request, fetching approvals concurrently.
///
/// A failed approval lookup yields an empty approval list.
pub async fn enrich(
    gateway: &dyn Gateway,
    fetcher: &FetchOrchestrator,
    mrs: Vec<MergeRequest>,
    context: &RepoContext,
    now: DateTime<Utc>,
) -> Result<Vec<MergeRequestWithStatus>, AppError> {
    let mut approvals = fetch_approvals(gateway, fetcher, &mrs, FetchPolicy::Lenient).await?;
    let stale_before = subtract_working_days(now, STALE_AFTER_WORKING_DAYS);

    Ok(mrs
        .into_iter()
        .map(|mr| {
            let approvers = approvals.remove(&mr.key()).unwrap_or_else(|| {
                log::warn!("Approvals unavailable for MR !{}; showing none", mr.iid);
                Vec::new()
            });
            with_status(mr, approvers, context, stale_before)
        })
        .collect())
}

/// Display order: current branch, then current project, then most recently
/// updated.
pub fn compare_priority(a: &MergeRequestWithStatus, b: &MergeRequestWithStatus) -> Ordering {
    b.is_current_branch
        .cmp(&a.is_current_branch)
        .then_with(|| b.is_current_project.cmp(&a.is_current_project))
        .then_with(|| {
            b.merge_request
                .updated_at
                .cmp(&a.merge_request.updated_at)
        })
}

/// Stable sort by [`compare_priority`].
pub fn sort_by_priority(mut mrs: Vec<MergeRequestWithStatus>) -> Vec<MergeRequestWithStatus> {
    mrs.sort_by(compare_priority);
    mrs
}

//! Workload computation.
//!
//! Attributes commits to users by author email and counts, per team member,
//! the merge requests they are involved in but have not approved yet.

use crate::error::AppError;
use crate::models::{MergeRequest, User, UserWorkload};
use crate::services::classifier::{has_approved, is_involved};
use crate::services::fetch::{FetchOrchestrator, FetchPolicy};
use crate::services::gateway::{Gateway, SCOPE_ALL, STATE_OPENED};
use std::collections::{HashMap, HashSet};

/// Approvals keyed by `(project_id, iid)`.
pub type ApprovalMap = HashMap<(i64, i64), Vec<User>>;

/// Map every non-empty user email in the directory to its user ID.
///
/// When several users share an email the last one listed wins.
pub async fn build_email_index(gateway: &dyn Gateway) -> Result<HashMap<String, i64>, AppError> {
    let users = gateway
        .get_all_users()
        .await
        .map_err(|e| e.context("Failed to get all users"))?;

    Ok(users
        .iter()
        .filter_map(|u| u.email().map(|email| (email.to_string(), u.id)))
        .collect())
}

/// Count commits per user ID for a project.
///
/// Emails missing from `index` are retried as a handle lookup on the local
/// part of the address; hits are written back into `index`, misses skip the
/// commit. Commits without an author email are ignored.
pub async fn count_commits(
    gateway: &dyn Gateway,
    project_id: i64,
    index: &mut HashMap<String, i64>,
) -> Result<HashMap<i64, usize>, AppError> {
    let commits = gateway
        .list_commits(project_id)
        .await
        .map_err(|e| e.context("Failed to get commits"))?;

    let mut counts = HashMap::new();
    let mut misses = HashSet::new();

    for commit in &commits {
        let email = commit.author_email.as_str();
        if email.is_empty() || misses.contains(email) {
            continue;
        }

        let user_id = match index.get(email) {
            Some(&id) => id,
            None => {
                let handle = email.split('@').next().unwrap_or_default();
                match gateway.get_user_by_username(handle).await {
                    Ok(user) => {
                        index.insert(email.to_string(), user.id);
                        user.id
                    }
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        log::debug!("No user for commit author {}: {}", email, err);
                        misses.insert(email.to_string());
                        continue;
                    }
                }
            }
        };

        *counts.entry(user_id).or_insert(0) += 1;
    }

    Ok(counts)
}

/// Fetch approvals for every merge request under the given policy.
///
/// Keys are collected before the first await so the returned future holds
/// no borrowed iterator.
pub async fn fetch_approvals<'a>(
    gateway: &dyn Gateway,
    fetcher: &FetchOrchestrator,
    mrs: impl IntoIterator<Item = &'a MergeRequest>,
    policy: FetchPolicy,
) -> Result<ApprovalMap, AppError> {
    let keys: Vec<(i64, i64)> = mrs.into_iter().map(MergeRequest::key).collect();
    fetcher
        .fetch_all(keys, policy, |(project_id, iid)| {
            gateway.get_merge_request_approvals(project_id, iid)
        })
        .await
}

/// Resolve team handles, preserving configured order. Unresolvable members
/// are left out.
pub async fn resolve_team(
    gateway: &dyn Gateway,
    fetcher: &FetchOrchestrator,
    team: &[String],
) -> Result<Vec<User>, AppError> {
    let resolved = fetcher
        .fetch_all(team.iter().cloned(), FetchPolicy::Lenient, |handle| async move {
            gateway.get_user_by_username(&handle).await
        })
        .await?;

    Ok(team
        .iter()
        .filter_map(|handle| {
            let user = resolved.get(handle).cloned();
            if user.is_none() {
                log::warn!("Skipping team member {}: user could not be resolved", handle);
            }
            user
        })
        .collect())
}

/// Merge requests `user_id` is involved in and has not approved.
///
/// Merge requests whose approvals are missing from `approvals` are left out.
pub fn unresolved_for(
    user_id: i64,
    mrs: &[MergeRequest],
    approvals: &ApprovalMap,
) -> Vec<MergeRequest> {
    mrs.iter()
        .filter(|&mr| is_involved(Some(mr), user_id))
        .filter(|mr| match approvals.get(&mr.key()) {
            Some(approvers) => !has_approved(approvers, user_id),
            None => false,
        })
        .cloned()
        .collect()
}

/// Open merge requests across every visible project.
async fn open_merge_requests(gateway: &dyn Gateway) -> Result<Vec<MergeRequest>, AppError> {
    gateway
        .list_merge_requests(STATE_OPENED, Some(SCOPE_ALL))
        .await
        .map_err(|e| e.context("Failed to get merge requests"))
}

/// Per-member commit and unresolved-MR counts for a project.
pub async fn compute_team_workload(
    gateway: &dyn Gateway,
    fetcher: &FetchOrchestrator,
    project_id: i64,
    team: &[String],
) -> Result<Vec<UserWorkload>, AppError> {
    let mut index = build_email_index(gateway).await?;
    let commits = count_commits(gateway, project_id, &mut index).await?;
    let mrs = open_merge_requests(gateway).await?;
    let members = resolve_team(gateway, fetcher, team).await?;

    let involved: Vec<&MergeRequest> = mrs
        .iter()
        .filter(|&mr| members.iter().any(|m| is_involved(Some(mr), m.id)))
        .collect();
    let approvals = fetch_approvals(
        gateway,
        fetcher,
        involved.iter().copied(),
        FetchPolicy::Lenient,
    )
    .await?;

    for mr in &involved {
        if !approvals.contains_key(&mr.key()) {
            log::warn!(
                "Approvals unavailable for MR !{} in project {}; not counted",
                mr.iid,
                mr.project_id
            );
        }
    }

    Ok(members
        .into_iter()
        .map(|user| {
            let mr_count = unresolved_for(user.id, &mrs, &approvals).len();
            let commit_count = commits.get(&user.id).copied().unwrap_or(0);
            UserWorkload::new(user, mr_count, commit_count)
        })
        .collect())
}

/// Per-member list of unresolved merge requests, without commit counts.
///
/// A member whose approval batch fails is left out.
pub async fn compute_active_workload(
    gateway: &dyn Gateway,
    fetcher: &FetchOrchestrator,
    team: &[String],
) -> Result<Vec<UserWorkload>, AppError> {
    let mrs = open_merge_requests(gateway).await?;
    let members = resolve_team(gateway, fetcher, team).await?;

    let mut workloads = Vec::with_capacity(members.len());
    for user in members {
        let relevant: Vec<&MergeRequest> = mrs
            .iter()
            .filter(|&mr| is_involved(Some(mr), user.id))
            .collect();

        let batch = fetch_approvals(
            gateway,
            fetcher,
            relevant.iter().copied(),
            FetchPolicy::Strict,
        )
        .await;

        let approvals = match batch {
            Ok(approvals) => approvals,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                log::warn!("Skipping {}: failed to fetch approvals: {}", user.username, err);
                continue;
            }
        };

        workloads.push(active_workload(user, &mrs, &approvals));
    }

    Ok(workloads)
}

/// Unresolved merge requests of a single user. Any approval failure is fatal.
pub async fn compute_user_review_workload(
    gateway: &dyn Gateway,
    fetcher: &FetchOrchestrator,
    user: User,
) -> Result<UserWorkload, AppError> {
    let mrs = open_merge_requests(gateway).await?;
    let user_id = user.id;
    let relevant = mrs.iter().filter(|&mr| is_involved(Some(mr), user_id));

    let approvals = fetch_approvals(gateway, fetcher, relevant, FetchPolicy::Strict)
        .await
        .map_err(|e| e.context("Failed to get MR approvals"))?;

    Ok(active_workload(user, &mrs, &approvals))
}

fn active_workload(user: User, mrs: &[MergeRequest], approvals: &ApprovalMap) -> UserWorkload {
    let active = unresolved_for(user.id, mrs, approvals);
    UserWorkload {
        mr_count: active.len(),
        commits: 0,
        active_mrs: active,
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Commit;
    use crate::services::memory_gateway::{InMemoryGateway, Operation};
    use chrono::Utc;

    fn commit(email: &str) -> Commit {
        Commit {
            id: "abc".into(),
            author_name: "Someone".into(),
            author_email: email.into(),
            created_at: Utc::now(),
            message: "change".into(),
            web_url: String::new(),
        }
    }

    fn mr(project_id: i64, iid: i64, author: i64, reviewers: &[i64]) -> MergeRequest {
        let now = Utc::now();
        MergeRequest {
            id: project_id * 100 + iid,
            iid,
            title: format!("MR {}", iid),
            description: String::new(),
            web_url: String::new(),
            author: Some(User::new(author, format!("user{}", author))),
            assignee: None,
            reviewers: reviewers
                .iter()
                .map(|&id| User::new(id, format!("user{}", id)))
                .collect(),
            created_at: now,
            updated_at: now,
            project_id,
            draft: false,
            source_branch: "feature".into(),
        }
    }

    #[tokio::test]
    async fn test_email_index_skips_empty_emails() {
        let gateway = InMemoryGateway::new().with_users(vec![
            User::new(1, "alice").with_email("alice@corp.com"),
            User::new(2, "bob").with_email(""),
            User::new(3, "carol"),
        ]);

        let index = build_email_index(&gateway).await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index["alice@corp.com"], 1);
    }

    #[tokio::test]
    async fn test_commits_attributed_by_email() {
        let gateway = InMemoryGateway::new()
            .with_users(vec![User::new(1, "alice").with_email("alice@corp.com")])
            .with_commits(
                10,
                vec![
                    commit("alice@corp.com"),
                    commit("alice@corp.com"),
                    commit("alice@corp.com"),
                    commit(""),
                ],
            );

        let mut index = build_email_index(&gateway).await.unwrap();
        let counts = count_commits(&gateway, 10, &mut index).await.unwrap();

        assert_eq!(counts.len(), 1);
        assert_eq!(counts[&1], 3);
    }

    #[tokio::test]
    async fn test_commit_fallback_memoizes_handle_lookup() {
        let gateway = InMemoryGateway::new()
            .with_users(vec![User::new(7, "bob")])
            .with_commits(
                10,
                vec![
                    commit("bob@home.org"),
                    commit("bob@home.org"),
                    commit("ghost@nowhere.org"),
                    commit("ghost@nowhere.org"),
                ],
            );

        let mut index = HashMap::new();
        let counts = count_commits(&gateway, 10, &mut index).await.unwrap();

        assert_eq!(counts[&7], 2);
        assert_eq!(index["bob@home.org"], 7);
        assert!(!index.contains_key("ghost@nowhere.org"));
        // One lookup for bob, one for ghost.
        assert_eq!(gateway.calls(Operation::GetUserByUsername), 2);
    }

    #[tokio::test]
    async fn test_team_workload_counts_unresolved_only() {
        let alice = User::new(1, "alice").with_email("alice@corp.com");
        let bob = User::new(2, "bob");
        let gateway = InMemoryGateway::new()
            .with_users(vec![alice.clone(), bob.clone(), User::new(3, "author")])
            .with_commits(10, vec![commit("alice@corp.com")])
            .with_merge_requests(vec![
                mr(10, 1, 3, &[1, 2]),
                mr(10, 2, 3, &[1]),
                mr(20, 1, 1, &[2]),
            ])
            .with_approvals(10, 2, vec![alice.clone()]);

        let team = vec!["alice".to_string(), "ghost".to_string(), "bob".to_string()];
        let workloads = compute_team_workload(&gateway, &FetchOrchestrator::new(4), 10, &team)
            .await
            .unwrap();

        assert_eq!(workloads.len(), 2);
        assert_eq!(workloads[0].user.id, 1);
        assert_eq!(workloads[0].mr_count, 1);
        assert_eq!(workloads[0].commits, 1);
        assert_eq!(workloads[1].user.id, 2);
        assert_eq!(workloads[1].mr_count, 2);
        assert_eq!(workloads[1].commits, 0);
    }

    #[tokio::test]
    async fn test_same_iid_in_different_projects_not_confused() {
        let bob = User::new(2, "bob");
        let gateway = InMemoryGateway::new()
            .with_users(vec![bob.clone()])
            .with_merge_requests(vec![mr(10, 1, 3, &[2]), mr(20, 1, 3, &[2])])
            .with_approvals(20, 1, vec![bob.clone()]);

        let team = vec!["bob".to_string()];
        let workloads = compute_team_workload(&gateway, &FetchOrchestrator::new(4), 10, &team)
            .await
            .unwrap();

        assert_eq!(workloads[0].mr_count, 1);
    }

    #[tokio::test]
    async fn test_failed_approval_fetch_is_not_counted() {
        let gateway = InMemoryGateway::new()
            .with_users(vec![User::new(2, "bob")])
            .with_merge_requests(vec![mr(10, 1, 3, &[2]), mr(10, 2, 3, &[2])]);
        gateway.fail_for(
            Operation::GetApprovals,
            InMemoryGateway::merge_request_key(10, 1),
            || AppError::network("timeout"),
        );

        let team = vec!["bob".to_string()];
        let workloads = compute_team_workload(&gateway, &FetchOrchestrator::new(4), 10, &team)
            .await
            .unwrap();

        assert_eq!(workloads[0].mr_count, 1);
    }

    #[tokio::test]
    async fn test_active_workload_omits_member_on_approval_failure() {
        let gateway = InMemoryGateway::new()
            .with_users(vec![User::new(1, "alice"), User::new(2, "bob")])
            .with_merge_requests(vec![mr(10, 1, 3, &[1]), mr(10, 2, 3, &[2])]);
        gateway.fail_for(
            Operation::GetApprovals,
            InMemoryGateway::merge_request_key(10, 1),
            || AppError::network("timeout"),
        );

        let team = vec!["alice".to_string(), "bob".to_string()];
        let workloads = compute_active_workload(&gateway, &FetchOrchestrator::new(4), &team)
            .await
            .unwrap();

        assert_eq!(workloads.len(), 1);
        assert_eq!(workloads[0].user.id, 2);
        assert_eq!(workloads[0].active_mrs.len(), 1);
        assert_eq!(workloads[0].active_mrs[0].iid, 2);
    }

    #[tokio::test]
    async fn test_user_review_workload_fails_on_approval_error() {
        let gateway = InMemoryGateway::new().with_merge_requests(vec![mr(10, 1, 3, &[1])]);
        gateway.fail(Operation::GetApprovals, || AppError::network("timeout"));

        let alice = User::new(1, "alice");
        let err = compute_user_review_workload(&gateway, &FetchOrchestrator::new(4), alice)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Network { .. }));
    }
}

//! Webhook endpoint tests, driving the router without a socket.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use gg_lib::models::{MergeRequest, User};
use gg_lib::services::memory_gateway::{InMemoryGateway, Operation};
use gg_lib::services::webhook::{self, HOOK_PATH};
use gg_lib::services::{Engine, FetchOrchestrator, StaticRepoContext};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn merge_request(iid: i64, author: User) -> MergeRequest {
    let now = Utc::now();
    MergeRequest {
        id: 100 + iid,
        iid,
        title: "Add login".into(),
        description: String::new(),
        web_url: String::new(),
        author: Some(author),
        assignee: None,
        reviewers: vec![],
        created_at: now,
        updated_at: now,
        project_id: 1,
        draft: false,
        source_branch: "login".into(),
    }
}

fn gateway() -> InMemoryGateway {
    let alice = User::new(1, "alice");
    InMemoryGateway::new()
        .with_users(vec![alice.clone(), User::new(2, "bob"), User::new(3, "carol")])
        .with_merge_requests(vec![merge_request(7, alice)])
}

async fn engine(gateway: Arc<InMemoryGateway>) -> Arc<Engine> {
    Arc::new(
        Engine::new(
            gateway,
            vec!["alice".into(), "bob".into(), "carol".into()],
            FetchOrchestrator::new(4),
            Arc::new(StaticRepoContext::none()),
        )
        .await,
    )
}

fn hook_event(iid: i64, attributes: Value) -> Value {
    let mut attrs = json!({ "iid": iid, "state": "opened", "title": "Add login" });
    if let (Some(target), Some(extra)) = (attrs.as_object_mut(), attributes.as_object()) {
        target.extend(extra.clone());
    }
    json!({
        "object_kind": "merge_request",
        "project": { "id": 1 },
        "object_attributes": attrs,
    })
}

async fn post(engine: Arc<Engine>, body: impl Into<Body>) -> (StatusCode, Value) {
    let response = webhook::router(engine)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(HOOK_PATH)
                .header("content-type", "application/json")
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_unassigned_merge_request_is_assigned() {
    let gateway = Arc::new(gateway());
    let engine = engine(gateway.clone()).await;

    let (status, body) = post(engine, hook_event(7, json!({ "assignee_id": null })).to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "assigned");
    assert_eq!(body["suggestion"]["assignee"]["username"], "bob");
    assert_eq!(body["suggestion"]["reviewer"]["username"], "carol");

    let updates = gateway.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].assignee_id, Some(2));
    assert_eq!(updates[0].reviewer_ids, vec![3]);
}

#[tokio::test]
async fn test_other_events_are_ignored() {
    let gateway = Arc::new(gateway());
    let engine = engine(gateway.clone()).await;

    let push = json!({ "object_kind": "push", "ref": "refs/heads/main" });
    let (status, body) = post(engine.clone(), push.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");

    let draft = hook_event(7, json!({ "work_in_progress": true }));
    let (status, body) = post(engine.clone(), draft.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reason"], "draft merge request");

    let assigned = hook_event(7, json!({ "assignee_id": 3 }));
    let (status, body) = post(engine, assigned.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reason"], "already assigned");

    assert_eq!(gateway.calls(Operation::GetMergeRequest), 0);
    assert!(gateway.updates().is_empty());
}

#[tokio::test]
async fn test_zero_assignee_counts_as_unassigned() {
    let gateway = Arc::new(gateway());
    let engine = engine(gateway.clone()).await;

    let (status, body) = post(engine, hook_event(7, json!({ "assignee_id": 0 })).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "assigned");
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let gateway = Arc::new(gateway());
    let engine = engine(gateway.clone()).await;

    let (status, _) = post(engine, "{\"object_kind\": ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(gateway.calls(Operation::GetMergeRequest), 0);
}

#[tokio::test]
async fn test_engine_failure_is_server_error() {
    let gateway = Arc::new(gateway());
    let engine = engine(gateway.clone()).await;

    let (status, body) = post(engine, hook_event(99, json!({})).to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "NOT_FOUND");
    assert!(gateway.updates().is_empty());
}

#[tokio::test]
async fn test_policy_failure_skips_without_write() {
    let away = |id, name| User::new(id, name).with_status("on vacation", "");
    let gateway = Arc::new(
        InMemoryGateway::new()
            .with_users(vec![User::new(1, "alice"), away(2, "bob"), away(3, "carol")])
            .with_merge_requests(vec![merge_request(7, User::new(9, "mallory"))]),
    );
    gateway.fail_for(Operation::GetUserByUsername, "alice", || {
        gg_lib::error::AppError::not_found("User")
    });
    let engine = engine(gateway.clone()).await;

    let (status, body) = post(engine, hook_event(7, json!({})).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "skipped");
    assert!(gateway.updates().is_empty());
}

#[tokio::test]
async fn test_lone_author_skips_without_write() {
    let gateway = Arc::new(
        InMemoryGateway::new()
            .with_users(vec![User::new(1, "alice")])
            .with_merge_requests(vec![merge_request(7, User::new(1, "alice"))]),
    );
    let engine = Arc::new(
        Engine::new(
            gateway.clone(),
            vec!["alice".into()],
            FetchOrchestrator::new(1),
            Arc::new(StaticRepoContext::none()),
        )
        .await,
    );

    let (status, body) = post(engine, hook_event(7, json!({})).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "skipped");
    assert!(gateway.updates().is_empty());
}

#[tokio::test]
async fn test_server_stops_when_cancelled() {
    let gateway = Arc::new(gateway());
    let engine = engine(gateway).await;

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let result = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        webhook::serve(engine, "127.0.0.1:0", shutdown),
    )
    .await
    .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_server_binds_host_name() {
    let gateway = Arc::new(gateway());
    let engine = engine(gateway).await;

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let result = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        webhook::serve(engine, "localhost:0", shutdown),
    )
    .await
    .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_unresolvable_bind_address_is_config_error() {
    let gateway = Arc::new(gateway());
    let engine = engine(gateway).await;

    let err = webhook::serve(engine, "not-an-address", CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, gg_lib::error::AppError::Config { .. }));
}

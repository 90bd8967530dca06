//! GitLab webhook endpoint.
//!
//! Newly opened merge requests without an assignee are auto-assigned
//! through [`Engine::auto_assign`]. Everything else is acknowledged and
//! ignored so GitLab does not retry.

use crate::error::AppError;
use crate::services::engine::Engine;
use crate::services::suggester::Suggestion;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Path GitLab posts hook events to.
pub const HOOK_PATH: &str = "/gitlab/hook";

const MERGE_REQUEST_KIND: &str = "merge_request";

// ── Payload ─────────────────────────────────────────────────────────────────

/// The subset of a GitLab hook payload the endpoint reads.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object_kind: String,

    #[serde(default)]
    pub project: HookProject,

    #[serde(default)]
    pub object_attributes: HookAttributes,
}

#[derive(Debug, Default, Deserialize)]
pub struct HookProject {
    #[serde(default)]
    pub id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct HookAttributes {
    #[serde(default)]
    pub iid: i64,

    #[serde(default)]
    pub work_in_progress: bool,

    #[serde(default)]
    pub draft: bool,

    #[serde(default)]
    pub assignee_id: Option<i64>,

    #[serde(default)]
    pub assignee_ids: Vec<i64>,
}

impl WebhookPayload {
    /// Why the event needs no action, if it doesn't.
    fn ignore_reason(&self) -> Option<&'static str> {
        let attrs = &self.object_attributes;
        if self.object_kind != MERGE_REQUEST_KIND {
            Some("not a merge request event")
        } else if attrs.work_in_progress || attrs.draft {
            Some("draft merge request")
        } else if attrs.assignee_id.is_some_and(|id| id != 0) || !attrs.assignee_ids.is_empty() {
            Some("already assigned")
        } else {
            None
        }
    }
}

// ── Responses ───────────────────────────────────────────────────────────────

/// Body of every successful hook response.
#[derive(Debug, Serialize)]
pub struct HookResponse {
    /// `ignored`, `skipped` or `assigned`.
    pub status: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Suggestion>,
}

impl HookResponse {
    fn ignored(reason: impl Into<String>) -> Self {
        Self {
            status: "ignored",
            reason: Some(reason.into()),
            suggestion: None,
        }
    }
}

#[derive(Serialize)]
struct HookError {
    code: String,
    message: String,
}

/// Wrapper to make AppError usable as an axum error response.
struct HookErr(AppError);

impl IntoResponse for HookErr {
    fn into_response(self) -> Response {
        let code = match &self.0 {
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::Authentication { .. } | AppError::AuthenticationExpired { .. } => {
                "UNAUTHORIZED"
            }
            AppError::GitLabApi { .. } | AppError::Network { .. } => "UPSTREAM_ERROR",
            _ => "INTERNAL_ERROR",
        };
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(HookError {
                code: code.to_string(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// ── Routes ──────────────────────────────────────────────────────────────────

/// Router exposing the hook endpoint.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route(HOOK_PATH, post(handle_hook))
        .with_state(engine)
}

async fn handle_hook(
    State(engine): State<Arc<Engine>>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<HookResponse>, HookErr> {
    if let Some(reason) = payload.ignore_reason() {
        log::debug!("Ignoring hook event: {}", reason);
        return Ok(Json(HookResponse::ignored(reason)));
    }

    let project_id = payload.project.id;
    let mr_iid = payload.object_attributes.iid;

    match engine.auto_assign(project_id, mr_iid).await {
        Ok(suggestion) if suggestion.assignee.is_some() => Ok(Json(HookResponse {
            status: "assigned",
            reason: None,
            suggestion: Some(suggestion),
        })),
        Ok(suggestion) => Ok(Json(HookResponse {
            status: "skipped",
            reason: Some("no eligible assignee".to_string()),
            suggestion: Some(suggestion),
        })),
        Err(e) if e.is_policy() => {
            log::info!("Not assigning MR !{} in project {}: {}", mr_iid, project_id, e);
            Ok(Json(HookResponse {
                status: "skipped",
                reason: Some(e.to_string()),
                suggestion: None,
            }))
        }
        Err(e) => {
            log::error!("Failed to auto-assign MR !{} in project {}: {}", mr_iid, project_id, e);
            Err(HookErr(e))
        }
    }
}

/// Serve the hook endpoint on `addr` until `shutdown` is cancelled.
///
/// `addr` is `host:port`; host names such as `localhost` are resolved.
pub async fn serve(
    engine: Arc<Engine>,
    addr: &str,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::config(format!("Failed to bind to {}: {}", addr, e)))?;

    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| addr.to_string());
    log::info!("[webhook] Listening on http://{}{}", local, HOOK_PATH);

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

    log::info!("[webhook] Server stopped");
    Ok(())
}

//! gg - GitLab team workload analysis and merge request auto-assignment.
//!
//! The library exposes the [`services::Engine`] and its gateways; the `gg`
//! binary runs the webhook server on top of it.

pub mod config;
pub mod error;
pub mod models;
pub mod services;

use config::Config;
use error::AppError;
use services::gitlab_client::GitLabClientConfig;
use services::{
    webhook, CachedGateway, Engine, FetchOrchestrator, GitLabClient, GitLabGateway, Issuer,
    RepoContextSource, StaticRepoContext, UserCache,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Build an engine backed by the GitLab API.
///
/// The webhook never runs inside a clone, so the engine gets no working copy.
pub async fn build_engine(config: &Config, cancel: CancellationToken) -> Result<Engine, AppError> {
    build_engine_with_repo(config, cancel, Arc::new(StaticRepoContext::none())).await
}

/// Build an engine backed by the GitLab API that reads the caller's working
/// copy from `repo`, e.g. a [`services::GitWorkingCopy`] of a clone.
pub async fn build_engine_with_repo(
    config: &Config,
    cancel: CancellationToken,
    repo: Arc<dyn RepoContextSource>,
) -> Result<Engine, AppError> {
    let issuer = Issuer::new(config.issue_url_template.as_deref())?;
    let client = GitLabClient::new(GitLabClientConfig {
        base_url: config.base_url.clone(),
        token: config.token.clone(),
        timeout_secs: config.timeout_secs,
        max_pages: config.max_pages,
    })?;

    let fetcher = FetchOrchestrator::with_cancellation(config.fetch_concurrency, cancel);
    let users = Arc::new(UserCache::new());
    let direct = GitLabGateway::new(client, users.clone(), fetcher.clone());
    let gateway = CachedGateway::new(Arc::new(direct), users, fetcher.clone());

    Ok(Engine::new(Arc::new(gateway), config.team_users.clone(), fetcher, repo)
        .await
        .with_base_url(config.base_url.clone())
        .with_issuer(issuer))
}

/// Load configuration from the environment and serve the webhook until
/// Ctrl-C.
pub async fn run() -> Result<(), AppError> {
    let config = Config::from_env()?;
    let addr = config.webhook_bind_address()?;

    log::info!(
        "Starting gg for {} with team [{}]",
        config.base_url,
        config.team_users.join(", ")
    );

    let cancel = CancellationToken::new();
    let engine = build_engine(&config, cancel.clone()).await?;

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        log::info!("Shutdown requested");
        on_signal.cancel();
    });

    webhook::serve(Arc::new(engine), &addr, cancel).await
}

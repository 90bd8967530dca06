//! Business logic services.
//!
//! This module contains the workload and assignment logic, the GitLab data
//! gateways it runs against, and the webhook front end.
//!
//! Services depend only on the [`Gateway`] port, so they are testable
//! against [`InMemoryGateway`].

pub mod cached_gateway;
pub mod classifier;
pub mod engine;
pub mod enricher;
pub mod fetch;
pub mod gateway;
pub mod git_context;
pub mod gitlab_client;
pub mod gitlab_gateway;
pub mod issue;
pub mod memory_gateway;
pub mod suggester;
pub mod user_cache;
pub mod webhook;
pub mod workload;

pub use cached_gateway::CachedGateway;
pub use engine::Engine;
pub use fetch::{FetchOrchestrator, FetchPolicy};
pub use gateway::Gateway;
pub use git_context::{GitWorkingCopy, RepoContextSource, StaticRepoContext};
pub use gitlab_client::GitLabClient;
pub use gitlab_gateway::GitLabGateway;
pub use issue::Issuer;
pub use memory_gateway::InMemoryGateway;
pub use suggester::Suggestion;
pub use user_cache::UserCache;

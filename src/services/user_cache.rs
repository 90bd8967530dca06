//! Process-wide user cache.
//!
//! Users are indexed by both numeric ID and handle. Entries are never
//! evicted and failed lookups are never recorded. The cache is an explicit
//! instance shared through `Arc`, injected into the gateways that need it.

use crate::models::User;
use dashmap::DashMap;

/// Concurrent user store keyed by ID and by handle.
#[derive(Debug, Default)]
pub struct UserCache {
    by_id: DashMap<i64, User>,
    by_username: DashMap<String, User>,
}

impl UserCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a user under both its ID and handle. Last write wins.
    pub fn put(&self, user: &User) {
        self.by_id.insert(user.id, user.clone());
        self.by_username.insert(user.username.clone(), user.clone());
    }

    /// Store every user in the iterator.
    pub fn put_all<'a>(&self, users: impl IntoIterator<Item = &'a User>) {
        for user in users {
            self.put(user);
        }
    }

    /// Look up a user by numeric ID.
    pub fn get_by_id(&self, id: i64) -> Option<User> {
        self.by_id.get(&id).map(|entry| entry.value().clone())
    }

    /// Look up a user by handle.
    pub fn get_by_username(&self, username: &str) -> Option<User> {
        self.by_username
            .get(username)
            .map(|entry| entry.value().clone())
    }

    /// Snapshot of every cached user, in no particular order.
    pub fn list_all(&self) -> Vec<User> {
        self.by_id.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of distinct user IDs cached.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

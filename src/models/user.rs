//! User model.

use serde::{Deserialize, Serialize};

/// Availability status as published on the user's profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatus {
    /// Free-text status message (e.g. "OOO until Monday").
    pub message: String,

    /// Availability string such as `available` or `busy`.
    pub availability: String,
}

/// A user on the remote platform.
///
/// The numeric `id` is the stable identity; `username` is the handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,

    /// Commit email, only visible to administrators on most instances.
    pub email: Option<String>,

    pub status: UserStatus,
}

impl User {
    /// Create a user with just an ID and handle.
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            ..Default::default()
        }
    }

    /// Builder-style setter for the email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Builder-style setter for the status.
    pub fn with_status(mut self, message: impl Into<String>, availability: impl Into<String>) -> Self {
        self.status = UserStatus {
            message: message.into(),
            availability: availability.into(),
        };
        self
    }

    /// The email if present and non-empty.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.is_empty())
    }
}

//! Session status as reported by `GET /session-status/<id>`.

use serde::{Deserialize, Serialize};

/// Body of the session-status endpoint.
///
/// A body without `session_active` reads as inactive, which is also how the
/// client treats a session the server no longer knows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    #[serde(default)]
    pub session_active: bool,
    #[serde(default)]
    pub is_verified: Option<bool>,
    #[serde(default)]
    pub verification_started: Option<bool>,
}

impl SessionStatus {
    /// Status for a session the server reports as not found.
    pub const fn gone() -> Self {
        Self {
            session_active: false,
            is_verified: None,
            verification_started: None,
        }
    }

    /// Status for a live session, as a test server would report it.
    #[cfg(test)]
    pub const fn active() -> Self {
        Self {
            session_active: true,
            is_verified: Some(false),
            verification_started: Some(false),
        }
    }
}

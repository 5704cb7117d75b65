//! Onboarding state machine — tracks whether a user owes us a domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The phases of the linking handshake, per user.
///
/// `NoPrompt` → `AwaitingDomain` → back to `NoPrompt` once the answer is
/// processed, whatever the lookup outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingPhase {
    NoPrompt,
    AwaitingDomain,
}

impl Default for OnboardingPhase {
    fn default() -> Self {
        Self::NoPrompt
    }
}

impl std::fmt::Display for OnboardingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoPrompt => "no_prompt",
            Self::AwaitingDomain => "awaiting_domain",
        };
        write!(f, "{s}")
    }
}

/// A user who has been asked for a domain and has not answered yet.
///
/// Stored in the pending-onboarding store under the user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOnboarding {
    pub user_id: String,
    /// Workspace the prompt was issued in.
    pub workspace_id: String,
    pub started_at: DateTime<Utc>,
}

impl PendingOnboarding {
    pub fn new(user_id: &str, workspace_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            workspace_id: workspace_id.to_string(),
            started_at: Utc::now(),
        }
    }

    /// Whether this prompt is older than `ttl` at `now`.
    pub fn is_expired(&self, ttl: Option<std::time::Duration>, now: DateTime<Utc>) -> bool {
        let Some(ttl) = ttl else {
            return false;
        };
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.started_at) > ttl,
            Err(_) => false,
        }
    }
}

//! OnboardingManager — drives the domain-collection handshake.
//!
//! Only tracks who has been prompted. It never calls the backend; the
//! dispatcher does the lookup with the request returned here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use super::state::{OnboardingPhase, PendingOnboarding};
use crate::backend::normalize_domain;
use crate::error::StoreError;
use crate::store::{InMemoryStore, KeyValueStore};

/// A domain answer ready to be looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainLookup {
    /// Normalized domain to search for.
    pub domain: String,
    /// Text exactly as the user sent it.
    pub raw: String,
    pub workspace_id: String,
}

/// Outcome of [`OnboardingManager::resolve_domain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainAnswer {
    /// The user was awaiting a domain; the entry has been cleared.
    Lookup(DomainLookup),
    /// The user had no pending prompt.
    NotAwaiting,
    /// The user's prompt was older than the TTL; the entry has been cleared.
    Expired,
}

/// Per-user pending-link tracking.
pub struct OnboardingManager {
    store: Arc<dyn KeyValueStore<PendingOnboarding>>,
    ttl: Option<Duration>,
}

impl OnboardingManager {
    pub fn new(store: Arc<dyn KeyValueStore<PendingOnboarding>>, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    /// Manager over a fresh in-memory store.
    pub fn in_memory(ttl: Option<Duration>) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), ttl)
    }

    /// Current phase for `user_id`.
    pub async fn phase(&self, user_id: &str) -> Result<OnboardingPhase, StoreError> {
        Ok(match self.store.get(user_id).await? {
            Some(_) => OnboardingPhase::AwaitingDomain,
            None => OnboardingPhase::NoPrompt,
        })
    }

    /// Record that `user_id` is being asked for a domain.
    ///
    /// Returns `true` when a new prompt should be sent, `false` when the user
    /// was already awaiting one.
    pub async fn begin_if_unprompted(
        &self,
        user_id: &str,
        workspace_id: &str,
    ) -> Result<bool, StoreError> {
        let inserted = self
            .store
            .insert_if_absent(user_id, PendingOnboarding::new(user_id, workspace_id))
            .await?;

        if inserted {
            info!(user_id, workspace_id, "Onboarding prompt issued");
        } else {
            debug!(user_id, "Onboarding prompt already outstanding");
        }
        Ok(inserted)
    }

    /// Drop the prompt `user_id` has outstanding for `workspace_id`, if any.
    ///
    /// Called once the workspace is linked by someone else. A prompt for a
    /// different workspace is left alone.
    pub async fn withdraw(&self, user_id: &str, workspace_id: &str) -> Result<bool, StoreError> {
        match self.store.get(user_id).await? {
            Some(pending) if pending.workspace_id == workspace_id => {
                self.store.delete(user_id).await?;
                info!(user_id, workspace_id, "Onboarding prompt withdrawn, workspace already linked");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Treat `text` as the domain answer from `user_id`.
    ///
    /// Always clears the pending entry when there is one, so a failed lookup
    /// sends the user back through [`begin_if_unprompted`](Self::begin_if_unprompted).
    pub async fn resolve_domain(
        &self,
        user_id: &str,
        text: &str,
    ) -> Result<DomainAnswer, StoreError> {
        let Some(pending) = self.store.delete(user_id).await? else {
            return Ok(DomainAnswer::NotAwaiting);
        };

        if pending.is_expired(self.ttl, Utc::now()) {
            info!(
                user_id,
                started_at = %pending.started_at,
                "Discarding stale onboarding prompt"
            );
            return Ok(DomainAnswer::Expired);
        }

        Ok(DomainAnswer::Lookup(DomainLookup {
            domain: normalize_domain(text),
            raw: text.to_string(),
            workspace_id: pending.workspace_id,
        }))
    }
}

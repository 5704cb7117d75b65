//! Ticketing backend integration.
//!
//! The dispatcher only sees the [`TicketBackend`] trait and the normalized
//! records defined here. [`LinearClient`] is the production implementation.

pub mod linear;

pub use linear::LinearClient;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::error::BackendError;

/// Most tickets returned by a customer-scoped search.
pub const CUSTOMER_SEARCH_CAP: usize = 20;

/// Most tickets returned by a project-scoped search.
pub const PROJECT_SEARCH_CAP: usize = 10;

/// A workspace's resolved backend customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerLink {
    pub customer_id: String,
    pub customer_name: String,
    pub domain: String,
}

/// Normalized ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub id: String,
    /// Human-facing key, e.g. `SUP-42`.
    pub identifier: String,
    pub title: String,
    pub url: String,
    /// Workflow state name, e.g. "In Progress".
    pub status: String,
    /// Priority label; `None` when the ticket has no priority.
    pub priority: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// What a ticket operation is confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketScope {
    Customer(String),
    Project(String),
}

impl TicketScope {
    /// Fixed result cap for searches in this scope.
    pub fn result_cap(&self) -> usize {
        match self {
            Self::Customer(_) => CUSTOMER_SEARCH_CAP,
            Self::Project(_) => PROJECT_SEARCH_CAP,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Customer(id) | Self::Project(id) => id,
        }
    }
}

/// Backend-side status filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    /// Anything whose state type is not `completed` or `canceled`.
    Open,
}

impl std::fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
        }
    }
}

/// Search parameters for [`TicketBackend::find_tickets`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketQuery {
    /// Free-text post-filter over title and description.
    pub search: Option<String>,
    pub status_filter: Option<StatusFilter>,
}

/// Input for [`TicketBackend::create_ticket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub author_name: String,
}

/// Ticketing backend — customer directory, ticket creation, ticket search.
#[async_trait]
pub trait TicketBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Find the customer whose registered domains include `domain`
    /// (case-insensitive exact match). When several customers share the
    /// domain, the first one in backend enumeration order wins.
    async fn find_customer_by_domain(
        &self,
        domain: &str,
    ) -> Result<Option<CustomerLink>, BackendError>;

    /// Create a ticket with the backend's "no priority" value.
    async fn create_ticket(
        &self,
        scope: &TicketScope,
        ticket: NewTicket,
    ) -> Result<TicketRecord, BackendError>;

    /// List the most recently updated tickets in `scope`, newest first.
    ///
    /// The backend returns at most [`TicketScope::result_cap`] tickets and
    /// `query.search` is applied to that window afterwards, so an older ticket
    /// that matches the text is not returned.
    async fn find_tickets(
        &self,
        scope: &TicketScope,
        query: &TicketQuery,
    ) -> Result<Vec<TicketRecord>, BackendError>;
}

/// Create the configured backend.
pub fn create_backend(config: &BackendConfig) -> Arc<dyn TicketBackend> {
    tracing::info!(api_url = %config.api_url, "Using Linear ticketing backend");
    Arc::new(LinearClient::new(
        config.api_key.clone(),
        &config.api_url,
        &config.team_id,
    ))
}

/// Normalize a user-typed domain: trims, lower-cases, and strips Slack link
/// markup, URL scheme, `www.`, path, and a leading `@`.
pub fn normalize_domain(raw: &str) -> String {
    let mut domain = raw.trim();

    // Slack auto-links bare domains as `<http://acme.com|acme.com>`.
    if let Some(inner) = domain.strip_prefix('<').and_then(|d| d.strip_suffix('>')) {
        domain = inner.rsplit('|').next().unwrap_or(inner);
    }

    let mut domain = domain.to_lowercase();
    for prefix in ["https://", "http://", "mailto:"] {
        if let Some(rest) = domain.strip_prefix(prefix) {
            domain = rest.to_string();
        }
    }
    if let Some((_, host)) = domain.rsplit_once('@') {
        domain = host.to_string();
    }
    if let Some(rest) = domain.strip_prefix("www.") {
        domain = rest.to_string();
    }
    if let Some((host, _)) = domain.split_once('/') {
        domain = host.to_string();
    }

    domain.trim_end_matches('.').to_string()
}

/// Narrow `tickets` to those whose title or description contains `search`,
/// case-insensitively. `None` or blank search keeps everything.
pub fn apply_text_filter(tickets: Vec<TicketRecord>, search: Option<&str>) -> Vec<TicketRecord> {
    let Some(needle) = search.map(str::trim).filter(|s| !s.is_empty()) else {
        return tickets;
    };
    let needle = needle.to_lowercase();

    tickets
        .into_iter()
        .filter(|t| {
            t.title.to_lowercase().contains(&needle)
                || t
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle))
        })
        .collect()
}

/// Sort newest-updated first. Tickets without a timestamp go last.
pub fn sort_by_recency(tickets: &mut [TicketRecord]) {
    tickets.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

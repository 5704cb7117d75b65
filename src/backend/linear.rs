//! Linear backend — GraphQL over HTTPS.
//!
//! Customers come from the customer directory, tickets are Linear issues. An
//! issue belongs to a customer through a customer-need record.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::{
    CustomerLink, NewTicket, StatusFilter, TicketBackend, TicketQuery, TicketRecord, TicketScope,
    apply_text_filter, normalize_domain, sort_by_recency,
};
use crate::error::BackendError;

const BACKEND_NAME: &str = "linear";

/// Page size when walking the customer directory.
const CUSTOMER_PAGE_SIZE: u32 = 100;

/// Linear's "No priority" value.
const NO_PRIORITY: u8 = 0;

/// Upper bound on attaching a new issue to its customer. Must stay below the
/// dispatcher's backend timeout.
const ATTACH_TIMEOUT: Duration = Duration::from_secs(5);

/// Issue state types that the open filter excludes.
const CLOSED_STATE_TYPES: [&str; 2] = ["completed", "canceled"];

const ISSUE_FIELDS: &str = "id identifier title description url priority priorityLabel updatedAt state { name type }";

/// Linear GraphQL client.
pub struct LinearClient {
    api_key: SecretString,
    api_url: String,
    team_id: String,
    attach_timeout: Duration,
    client: reqwest::Client,
}

impl LinearClient {
    pub fn new(api_key: SecretString, api_url: &str, team_id: &str) -> Self {
        Self {
            api_key,
            api_url: api_url.to_string(),
            team_id: team_id.to_string(),
            attach_timeout: ATTACH_TIMEOUT,
            client: reqwest::Client::new(),
        }
    }

    /// Override how long the customer attach may take.
    pub fn with_attach_timeout(mut self, timeout: Duration) -> Self {
        self.attach_timeout = timeout;
        self
    }

    /// POST a GraphQL document and decode `data`.
    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, BackendError> {
        let body = serde_json::json!({
            "query": query,
            "variables": variables,
        });

        let resp = self
            .client
            .post(&self.api_url)
            .header(AUTHORIZATION, self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable {
                backend: BACKEND_NAME.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Unavailable {
                backend: BACKEND_NAME.into(),
                reason: format!("HTTP {status}: {text}"),
            });
        }

        let envelope: GraphQlResponse<T> =
            resp.json().await.map_err(|e| BackendError::InvalidResponse {
                backend: BACKEND_NAME.into(),
                reason: e.to_string(),
            })?;

        if let Some(errors) = envelope.errors.filter(|e| !e.is_empty()) {
            let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
            return Err(BackendError::InvalidResponse {
                backend: BACKEND_NAME.into(),
                reason: messages.join("; "),
            });
        }

        envelope.data.ok_or_else(|| BackendError::InvalidResponse {
            backend: BACKEND_NAME.into(),
            reason: "response has neither data nor errors".into(),
        })
    }

    async fn attach_to_customer(
        &self,
        customer_id: &str,
        issue_id: &str,
    ) -> Result<(), BackendError> {
        let query = "mutation AttachCustomer($input: CustomerNeedCreateInput!) { \
                     customerNeedCreate(input: $input) { success } }";
        let data: CustomerNeedData = self
            .graphql(
                query,
                serde_json::json!({
                    "input": { "customerId": customer_id, "issueId": issue_id }
                }),
            )
            .await?;

        if data.customer_need_create.success {
            Ok(())
        } else {
            Err(BackendError::InvalidResponse {
                backend: BACKEND_NAME.into(),
                reason: "customerNeedCreate returned success=false".into(),
            })
        }
    }
}

#[async_trait]
impl TicketBackend for LinearClient {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn find_customer_by_domain(
        &self,
        domain: &str,
    ) -> Result<Option<CustomerLink>, BackendError> {
        let wanted = normalize_domain(domain);
        let query = "query Customers($first: Int!, $after: String) { \
                     customers(first: $first, after: $after) { \
                     nodes { id name domains } pageInfo { hasNextPage endCursor } } }";

        let mut after: Option<String> = None;
        loop {
            let data: CustomersData = self
                .graphql(
                    query,
                    serde_json::json!({ "first": CUSTOMER_PAGE_SIZE, "after": after }),
                )
                .await?;

            let page = data.customers;
            if let Some(customer) = page.nodes.into_iter().find(|c| {
                c.domains
                    .iter()
                    .any(|d| d.trim().eq_ignore_ascii_case(&wanted))
            }) {
                debug!(domain = %wanted, customer_id = %customer.id, "Customer domain matched");
                return Ok(Some(CustomerLink {
                    customer_id: customer.id,
                    customer_name: customer.name,
                    domain: wanted,
                }));
            }

            match page.page_info {
                Some(info) if info.has_next_page && info.end_cursor.is_some() => {
                    after = info.end_cursor;
                }
                _ => return Ok(None),
            }
        }
    }

    async fn create_ticket(
        &self,
        scope: &TicketScope,
        ticket: NewTicket,
    ) -> Result<TicketRecord, BackendError> {
        let query = format!(
            "mutation CreateIssue($input: IssueCreateInput!) {{ \
             issueCreate(input: $input) {{ success issue {{ {ISSUE_FIELDS} }} }} }}"
        );

        let mut input = serde_json::json!({
            "teamId": self.team_id,
            "title": ticket.title,
            "description": ticket.description,
            "priority": NO_PRIORITY,
        });
        if let TicketScope::Project(project_id) = scope {
            input["projectId"] = serde_json::Value::String(project_id.clone());
        }

        let data: IssueCreateData = self
            .graphql(&query, serde_json::json!({ "input": input }))
            .await
            .map_err(|e| BackendError::CreateFailed {
                backend: BACKEND_NAME.into(),
                reason: e.to_string(),
            })?;

        let issue = match data.issue_create {
            IssuePayload {
                success: true,
                issue: Some(issue),
            } => issue,
            _ => {
                return Err(BackendError::CreateFailed {
                    backend: BACKEND_NAME.into(),
                    reason: "issueCreate returned no issue".into(),
                });
            }
        };

        info!(identifier = %issue.identifier, author = %ticket.author_name, "Linear issue created");

        if let TicketScope::Customer(customer_id) = scope {
            // The issue exists either way; without the link it just won't show
            // up in customer-scoped searches.
            let attached = tokio::time::timeout(
                self.attach_timeout,
                self.attach_to_customer(customer_id, &issue.id),
            )
            .await
            .unwrap_or(Err(BackendError::Timeout(self.attach_timeout)));
            if let Err(e) = attached {
                warn!(
                    error = %e,
                    issue = %issue.identifier,
                    customer_id = %customer_id,
                    "Failed to attach issue to customer"
                );
            }
        }

        Ok(TicketRecord::from(issue))
    }

    async fn find_tickets(
        &self,
        scope: &TicketScope,
        query: &TicketQuery,
    ) -> Result<Vec<TicketRecord>, BackendError> {
        let document = format!(
            "query Issues($filter: IssueFilter, $first: Int!) {{ \
             issues(filter: $filter, first: $first, orderBy: updatedAt) {{ \
             nodes {{ {ISSUE_FIELDS} }} }} }}"
        );

        let data: IssuesData = self
            .graphql(
                &document,
                serde_json::json!({
                    "filter": issue_filter(scope, query.status_filter),
                    "first": scope.result_cap(),
                }),
            )
            .await?;

        let mut tickets: Vec<TicketRecord> = data
            .issues
            .nodes
            .into_iter()
            .take(scope.result_cap())
            .map(TicketRecord::from)
            .collect();
        sort_by_recency(&mut tickets);

        Ok(apply_text_filter(tickets, query.search.as_deref()))
    }
}

/// Build the `IssueFilter` variable for a scope and optional status filter.
fn issue_filter(scope: &TicketScope, status: Option<StatusFilter>) -> serde_json::Value {
    let mut filter = match scope {
        TicketScope::Customer(id) => serde_json::json!({
            "needs": { "some": { "customer": { "id": { "eq": id } } } }
        }),
        TicketScope::Project(id) => serde_json::json!({
            "project": { "id": { "eq": id } }
        }),
    };

    if let Some(StatusFilter::Open) = status {
        filter["state"] = serde_json::json!({
            "type": { "nin": CLOSED_STATE_TYPES }
        });
    }

    filter
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct CustomersData {
    customers: CustomerConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerConnection {
    nodes: Vec<CustomerNode>,
    page_info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct CustomerNode {
    id: String,
    name: String,
    #[serde(default)]
    domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueCreateData {
    issue_create: IssuePayload,
}

#[derive(Debug, Deserialize)]
struct IssuePayload {
    success: bool,
    issue: Option<IssueNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerNeedData {
    customer_need_create: SuccessPayload,
}

#[derive(Debug, Deserialize)]
struct SuccessPayload {
    success: bool,
}

#[derive(Debug, Deserialize)]
struct IssuesData {
    issues: IssueConnection,
}

#[derive(Debug, Deserialize)]
struct IssueConnection {
    nodes: Vec<IssueNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueNode {
    id: String,
    identifier: String,
    title: String,
    description: Option<String>,
    url: String,
    #[serde(default)]
    priority: f64,
    priority_label: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    state: Option<IssueState>,
}

#[derive(Debug, Deserialize)]
struct IssueState {
    name: String,
}

impl From<IssueNode> for TicketRecord {
    fn from(node: IssueNode) -> Self {
        let priority = if node.priority == f64::from(NO_PRIORITY) {
            None
        } else {
            node.priority_label
        };

        Self {
            id: node.id,
            identifier: node.identifier,
            title: node.title,
            url: node.url,
            status: node
                .state
                .map(|s| s.name)
                .unwrap_or_else(|| "Unknown".to_string()),
            priority,
            description: node.description,
            updated_at: node.updated_at,
        }
    }
}

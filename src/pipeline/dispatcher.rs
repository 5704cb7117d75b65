//! Dispatcher — turns each inbound chat message into backend work and replies.
//!
//! Flow per message:
//! 1. Drop thread replies, subtyped events and malformed events
//! 2. Unlinked workspace → onboarding handshake (welcome, then domain lookup)
//! 3. Linked workspace → classify, then create or query tickets
//!
//! Every backend failure is caught here and answered with the generic error
//! reply. Backend detail only goes to the log.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backend::{CustomerLink, NewTicket, TicketBackend, TicketQuery, TicketScope};
use crate::channels::{Channel, IncomingMessage, OutgoingResponse};
use crate::config::DispatchConfig;
use crate::error::{BackendError, ChannelError, Error};
use crate::onboarding::{DomainAnswer, DomainLookup, OnboardingManager};
use crate::pipeline::intent::{IntentClassifier, IntentDescriptor};
use crate::responses;
use crate::workspace::WorkspaceLinkRegistry;

/// Longest ticket title, in characters.
pub const TITLE_MAX_CHARS: usize = 100;

/// Per-message orchestrator.
pub struct Dispatcher {
    backend: Arc<dyn TicketBackend>,
    links: WorkspaceLinkRegistry,
    onboarding: OnboardingManager,
    classifier: IntentClassifier,
    config: DispatchConfig,
    /// Picks reply phrasings.
    rng: Mutex<StdRng>,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn TicketBackend>,
        links: WorkspaceLinkRegistry,
        onboarding: OnboardingManager,
        config: DispatchConfig,
    ) -> Self {
        Self::with_rng(backend, links, onboarding, config, StdRng::from_entropy())
    }

    /// Like [`new`](Self::new) with a caller-supplied random source, so tests
    /// can pin reply phrasing.
    pub fn with_rng(
        backend: Arc<dyn TicketBackend>,
        links: WorkspaceLinkRegistry,
        onboarding: OnboardingManager,
        config: DispatchConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            backend,
            links,
            onboarding,
            classifier: IntentClassifier::new(),
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn links(&self) -> &WorkspaceLinkRegistry {
        &self.links
    }

    pub fn onboarding(&self) -> &OnboardingManager {
        &self.onboarding
    }

    /// Handle one message and return every reply in send order.
    pub async fn handle(&self, msg: &IncomingMessage) -> Vec<OutgoingResponse> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.dispatch(msg, tx).await;

        let mut replies = Vec::new();
        while let Ok(reply) = rx.try_recv() {
            replies.push(reply);
        }
        replies
    }

    /// Handle one message, pushing each reply to `out` as soon as it is ready.
    pub async fn dispatch(&self, msg: &IncomingMessage, out: mpsc::UnboundedSender<OutgoingResponse>) {
        if let Some(reason) = skip_reason(msg) {
            debug!(id = %msg.id, channel = %msg.channel, reason, "Ignoring message");
            return;
        }

        info!(
            id = %msg.id,
            workspace_id = %msg.workspace_id,
            user_id = %msg.user_id,
            "Handling message"
        );

        let replies = Replies { msg, out };
        if let Err(e) = self.route(msg, &replies).await {
            error!(
                id = %msg.id,
                workspace_id = %msg.workspace_id,
                user_id = %msg.user_id,
                error = %e,
                "Message handling failed"
            );
            replies.send(self.phrase(|rng| responses::error(rng)).await);
        }
    }

    async fn route(&self, msg: &IncomingMessage, replies: &Replies<'_>) -> Result<(), Error> {
        match self.links.get(&msg.workspace_id).await? {
            Some(link) => {
                // Someone else may have linked the workspace while this user
                // still owed a domain.
                self.onboarding
                    .withdraw(&msg.user_id, &msg.workspace_id)
                    .await?;
                self.handle_linked(msg, &link, replies).await
            }
            None => self.handle_unlinked(msg, replies).await,
        }
    }

    // ── Onboarding ──────────────────────────────────────────────────────

    async fn handle_unlinked(&self, msg: &IncomingMessage, replies: &Replies<'_>) -> Result<(), Error> {
        match self
            .onboarding
            .resolve_domain(&msg.user_id, &msg.content)
            .await?
        {
            DomainAnswer::Lookup(lookup) => self.link_workspace(lookup, replies).await,
            // A stale prompt counts as no prompt: greet again.
            DomainAnswer::NotAwaiting | DomainAnswer::Expired => {
                if self
                    .onboarding
                    .begin_if_unprompted(&msg.user_id, &msg.workspace_id)
                    .await?
                {
                    replies.send(self.phrase(|rng| responses::welcome_and_ask_domain(rng)).await);
                }
                Ok(())
            }
        }
    }

    async fn link_workspace(&self, lookup: DomainLookup, replies: &Replies<'_>) -> Result<(), Error> {
        let domain = lookup.domain;

        if domain.is_empty() {
            info!(raw = %lookup.raw, "Domain answer normalized to nothing");
            replies.send(self.phrase(|rng| responses::not_found(&lookup.raw, rng)).await);
            return Ok(());
        }

        replies.send(self.phrase(|rng| responses::verifying(&domain, rng)).await);

        let found = match self
            .with_timeout(self.backend.find_customer_by_domain(&domain))
            .await
        {
            Ok(found) => found,
            Err(e @ BackendError::Unavailable { .. }) => {
                warn!(
                    domain = %domain,
                    backend = self.backend.name(),
                    error = %e,
                    "Customer lookup failed, reporting not found"
                );
                None
            }
            Err(e) => return Err(e.into()),
        };

        match found {
            Some(link) => {
                self.links.set(&lookup.workspace_id, link.clone()).await?;
                replies.send(self.phrase(|rng| responses::setup_complete(&link, rng)).await);
            }
            None => {
                info!(domain = %domain, workspace_id = %lookup.workspace_id, "No customer for domain");
                replies.send(self.phrase(|rng| responses::not_found(&domain, rng)).await);
            }
        }
        Ok(())
    }

    // ── Ticket operations ───────────────────────────────────────────────

    async fn handle_linked(
        &self,
        msg: &IncomingMessage,
        link: &CustomerLink,
        replies: &Replies<'_>,
    ) -> Result<(), Error> {
        let intent = self.classifier.classify(&msg.content);
        let scope = TicketScope::Customer(link.customer_id.clone());
        debug!(id = %msg.id, intent = intent.label(), "Classified message");

        match &intent {
            IntentDescriptor::Create { text } => {
                let ticket = NewTicket {
                    title: ticket_title(text),
                    description: ticket_description(text, msg),
                    author_name: msg.author().to_string(),
                };
                let created = self
                    .with_timeout(self.backend.create_ticket(&scope, ticket))
                    .await?;

                info!(
                    workspace_id = %msg.workspace_id,
                    customer_id = %link.customer_id,
                    ticket = %created.identifier,
                    "Ticket created"
                );
                replies.send(responses::ticket_created(&created));
            }
            IntentDescriptor::Query { status_filter, .. } => {
                let query = TicketQuery {
                    search: intent.search_term(),
                    status_filter: *status_filter,
                };
                let tickets = self
                    .with_timeout(self.backend.find_tickets(&scope, &query))
                    .await?;

                info!(
                    workspace_id = %msg.workspace_id,
                    customer_id = %link.customer_id,
                    count = tickets.len(),
                    "Ticket query answered"
                );
                if tickets.is_empty() {
                    replies.send(self.phrase(|rng| responses::no_tickets(rng)).await);
                } else {
                    replies.send(responses::tickets_found(&tickets));
                }
            }
        }
        Ok(())
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        match tokio::time::timeout(self.config.backend_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.config.backend_timeout)),
        }
    }

    async fn phrase(&self, render: impl FnOnce(&mut StdRng) -> String) -> String {
        let mut rng = self.rng.lock().await;
        render(&mut rng)
    }
}

/// Reply sink bound to the triggering message.
struct Replies<'a> {
    msg: &'a IncomingMessage,
    out: mpsc::UnboundedSender<OutgoingResponse>,
}

impl Replies<'_> {
    fn send(&self, content: String) {
        let reply = OutgoingResponse::text(content).in_thread(self.msg.id.clone());
        if self.out.send(reply).is_err() {
            debug!(id = %self.msg.id, "Reply receiver dropped");
        }
    }
}

/// Why `msg` is not for the dispatcher, if it isn't.
fn skip_reason(msg: &IncomingMessage) -> Option<&'static str> {
    if msg.subtype.is_some() {
        Some("subtype")
    } else if msg.thread_id.is_some() {
        Some("thread reply")
    } else if msg.workspace_id.trim().is_empty()
        || msg.user_id.trim().is_empty()
        || msg.content.trim().is_empty()
    {
        Some("malformed")
    } else {
        None
    }
}

/// First [`TITLE_MAX_CHARS`] characters of the message.
pub fn ticket_title(text: &str) -> String {
    text.trim().chars().take(TITLE_MAX_CHARS).collect()
}

/// Full message text plus an attribution footer.
pub fn ticket_description(text: &str, msg: &IncomingMessage) -> String {
    format!(
        "{}\n\n---\nSubmitted by {} via {} (workspace {})",
        text.trim(),
        msg.author(),
        msg.channel,
        msg.workspace_id
    )
}

/// Consume `channel`'s messages until the stream ends, then wait for the
/// messages still in flight.
///
/// Each message runs on its own task, so a slow backend call for one
/// workspace never holds up another. Messages from the same user are handled
/// in arrival order. Replies are delivered as they are produced.
pub async fn run(dispatcher: Arc<Dispatcher>, channel: Arc<dyn Channel>) -> Result<(), ChannelError> {
    let mut messages = channel.start().await?;
    info!(channel = channel.name(), "Dispatcher started");

    let mut in_flight = JoinSet::new();
    // Completion signal of the latest message per user.
    let mut last_by_user: HashMap<String, oneshot::Receiver<()>> = HashMap::new();
    while let Some(message) = messages.next().await {
        let dispatcher = Arc::clone(&dispatcher);
        let channel = Arc::clone(&channel);

        // Reap finished handlers so the set stays small.
        while in_flight.try_join_next().is_some() {}
        last_by_user.retain(|_, done| matches!(done.try_recv(), Err(TryRecvError::Empty)));

        let (done_tx, done_rx) = oneshot::channel();
        let previous = last_by_user.insert(message.user_id.clone(), done_rx);

        in_flight.spawn(async move {
            if let Some(previous) = previous {
                // An error only means the earlier handler is gone.
                let _ = previous.await;
            }

            let (tx, mut rx) = mpsc::unbounded_channel();
            let deliver = async {
                while let Some(reply) = rx.recv().await {
                    if let Err(e) = channel.respond(&message, reply).await {
                        error!(
                            channel = channel.name(),
                            id = %message.id,
                            error = %e,
                            "Failed to send reply"
                        );
                    }
                }
            };
            tokio::join!(dispatcher.dispatch(&message, tx), deliver);
            let _ = done_tx.send(());
        });
    }

    info!(
        channel = channel.name(),
        in_flight = in_flight.len(),
        "Message stream ended"
    );
    while in_flight.join_next().await.is_some() {}
    Ok(())
}

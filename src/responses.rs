//! Reply text for every message the dispatcher sends.
//!
//! Pure functions. Kinds without ticket data pick one of a few equivalent
//! phrasings with the caller's random source; ticket-bearing replies are
//! deterministic templates.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::backend::{CustomerLink, TicketRecord};

/// Every reply the dispatcher can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Welcome,
    AskDomain,
    Verifying,
    SetupComplete,
    NotFound,
    TicketCreated,
    TicketsFound,
    NoTickets,
    Error,
}

impl ReplyKind {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::AskDomain => "ask_domain",
            Self::Verifying => "verifying",
            Self::SetupComplete => "setup_complete",
            Self::NotFound => "not_found",
            Self::TicketCreated => "ticket_created",
            Self::TicketsFound => "tickets_found",
            Self::NoTickets => "no_tickets",
            Self::Error => "error",
        }
    }

    /// Fixed phrasings for kinds that vary. Empty for the templated kinds.
    ///
    /// `{customer}` and `{domain}` are substituted by [`render`].
    pub fn variants(&self) -> &'static [&'static str] {
        match self {
            Self::Welcome => &[
                "Hi there! I'm your support assistant. I can file tickets and look up existing ones for your team.",
                "Hello! I help your team create support tickets and check on their progress right from chat.",
                "Welcome! I'm here to turn your messages into support tickets and keep you posted on them.",
            ],
            Self::AskDomain => &[
                "Before we start, what's your company's domain? (for example: acme.com)",
                "To link this workspace to your account, please reply with your company domain, like acme.com.",
                "First things first: which domain does your company use? Something like acme.com works.",
            ],
            Self::Verifying => &[
                "Checking {domain}, one moment...",
                "Looking up {domain} now...",
            ],
            Self::SetupComplete => &[
                "All set! This workspace is now linked to {customer}. Just describe a problem to file a ticket, or ask me to show your tickets.",
                "You're connected to {customer}. Send me an issue to open a ticket, or ask \"show my open tickets\".",
                "Done! {customer} is linked. Tell me what's wrong and I'll file it, or ask what's happening with your tickets.",
            ],
            Self::NotFound => &[
                "I couldn't find an account for {domain}. Send me any message to try again with a different domain.",
                "Hmm, {domain} doesn't match any customer I know. Message me again to retry with another domain.",
            ],
            Self::NoTickets => &[
                "I didn't find any matching tickets.",
                "No tickets match that right now.",
                "Nothing found. You're all clear!",
            ],
            Self::Error => &[
                "Sorry, something went wrong on my end. Please try again in a moment.",
                "I ran into a problem handling that. Please send it again shortly.",
                "Something didn't work there. Give it another try in a minute.",
            ],
            Self::TicketCreated | Self::TicketsFound => &[],
        }
    }
}

/// Substitution values for [`render`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplyVars<'a> {
    pub customer: Option<&'a str>,
    pub domain: Option<&'a str>,
}

/// Render a varying reply kind, choosing the phrasing with `rng`.
///
/// Returns an empty string for the templated kinds; use [`ticket_created`]
/// and [`tickets_found`] for those.
pub fn render<R: Rng + ?Sized>(kind: ReplyKind, vars: ReplyVars<'_>, rng: &mut R) -> String {
    let Some(template) = kind.variants().choose(rng) else {
        return String::new();
    };

    template
        .replace("{customer}", vars.customer.unwrap_or("your account"))
        .replace("{domain}", vars.domain.unwrap_or("that domain"))
}

/// First-contact prompt: welcome plus the domain question, as one message.
pub fn welcome_and_ask_domain<R: Rng + ?Sized>(rng: &mut R) -> String {
    let welcome = render(ReplyKind::Welcome, ReplyVars::default(), rng);
    let ask = render(ReplyKind::AskDomain, ReplyVars::default(), rng);
    format!("{welcome}\n\n{ask}")
}

pub fn verifying<R: Rng + ?Sized>(domain: &str, rng: &mut R) -> String {
    render(
        ReplyKind::Verifying,
        ReplyVars {
            domain: Some(domain),
            ..Default::default()
        },
        rng,
    )
}

pub fn setup_complete<R: Rng + ?Sized>(link: &CustomerLink, rng: &mut R) -> String {
    render(
        ReplyKind::SetupComplete,
        ReplyVars {
            customer: Some(&link.customer_name),
            domain: Some(&link.domain),
        },
        rng,
    )
}

pub fn not_found<R: Rng + ?Sized>(domain: &str, rng: &mut R) -> String {
    render(
        ReplyKind::NotFound,
        ReplyVars {
            domain: Some(domain),
            ..Default::default()
        },
        rng,
    )
}

pub fn no_tickets<R: Rng + ?Sized>(rng: &mut R) -> String {
    render(ReplyKind::NoTickets, ReplyVars::default(), rng)
}

pub fn error<R: Rng + ?Sized>(rng: &mut R) -> String {
    render(ReplyKind::Error, ReplyVars::default(), rng)
}

/// Confirmation for a newly created ticket.
pub fn ticket_created(ticket: &TicketRecord) -> String {
    format!(
        "Ticket {} created: {}\nTrack it here: {}",
        ticket.identifier, ticket.title, ticket.url
    )
}

/// One line per ticket, in the order given.
pub fn tickets_found(tickets: &[TicketRecord]) -> String {
    let noun = if tickets.len() == 1 { "ticket" } else { "tickets" };
    let mut out = format!("Found {} {noun}:", tickets.len());

    for ticket in tickets {
        out.push_str(&format!(
            "\n• {} {} [{}]",
            ticket.identifier, ticket.title, ticket.status
        ));
        if let Some(ref priority) = ticket.priority {
            out.push_str(&format!(" ({priority})"));
        }
        out.push_str(&format!(" {}", ticket.url));
    }

    out
}

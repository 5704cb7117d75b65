//! Intent classifier — keyword rules that decide create vs. query.
//!
//! Rules run in a fixed order over the lower-cased text and the first match
//! wins. Anything no rule claims becomes a ticket, so no message is dropped.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::backend::StatusFilter;

/// What a linked workspace's message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentDescriptor {
    /// File a new ticket from the text.
    Create { text: String },
    /// List existing tickets.
    Query {
        text: String,
        status_filter: Option<StatusFilter>,
    },
}

impl IntentDescriptor {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Query { .. } => "query",
        }
    }

    /// The original message text.
    pub fn text(&self) -> &str {
        match self {
            Self::Create { text } | Self::Query { text, .. } => text,
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Self::Query { .. })
    }

    /// Free-text search term of a query ("tickets about billing" → "billing").
    /// Always `None` for `Create`.
    pub fn search_term(&self) -> Option<String> {
        let Self::Query { text, .. } = self else {
            return None;
        };
        SEARCH_TERM
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().trim_end_matches(['?', '.', '!']).trim())
            .filter(|term| !term.is_empty())
            .map(String::from)
    }
}

static SEARCH_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:about|regarding|related to|mentioning)\s+(.+)$").unwrap()
});

/// What a matching rule produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleOutcome {
    Query,
    OpenQuery,
}

/// A single classification rule with a compiled regex.
#[derive(Debug, Clone)]
struct IntentRule {
    name: &'static str,
    regex: Regex,
    outcome: RuleOutcome,
}

/// Ordered keyword rules.
pub struct IntentClassifier {
    rules: Vec<IntentRule>,
    open_phrase: Regex,
}

impl IntentClassifier {
    pub fn new() -> Self {
        let open_phrase = Regex::new(r"(?s)\b(open|pending|active|my)\b.*\b(tickets?|issues?)\b").unwrap();

        let rules = vec![
            // "show me the tickets", "which issues are ..."
            IntentRule {
                name: "listing",
                regex: Regex::new(r"(?s)\b(show|list|what|which|get|find|see)\b.*\b(tickets?|issues?)\b")
                    .unwrap(),
                outcome: RuleOutcome::Query,
            },
            IntentRule {
                name: "open_tickets",
                regex: open_phrase.clone(),
                outcome: RuleOutcome::OpenQuery,
            },
            // "what happened to ...", "status of ...", "update on ..."
            IntentRule {
                name: "status_inquiry",
                regex: Regex::new(r"(?s)\bwhat\b.*\bhappened\b|\bstatus\b.*\bof\b|\bupdate\b.*\bon\b")
                    .unwrap(),
                outcome: RuleOutcome::Query,
            },
        ];

        Self { rules, open_phrase }
    }

    /// Classify `text`. Total: every input yields exactly one descriptor.
    pub fn classify(&self, text: &str) -> IntentDescriptor {
        let lowered = text.to_lowercase();

        let Some(rule) = self.rules.iter().find(|r| r.regex.is_match(&lowered)) else {
            debug!("No query rule matched, defaulting to create");
            return IntentDescriptor::Create {
                text: text.to_string(),
            };
        };

        // Open-ticket wording narrows the query even when an earlier rule
        // claimed the message ("show my open tickets").
        let open = rule.outcome == RuleOutcome::OpenQuery || self.open_phrase.is_match(&lowered);
        debug!(rule = rule.name, open, "Query rule matched");

        IntentDescriptor::Query {
            text: text.to_string(),
            status_filter: open.then_some(StatusFilter::Open),
        }
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

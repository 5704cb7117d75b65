//! Message pipeline.
//!
//! Every inbound message from any channel flows through:
//! 1. `Dispatcher::dispatch()` — filtering, onboarding or ticket routing
//! 2. `IntentClassifier::classify()` — keyword rules, linked workspaces only
//! 3. `TicketBackend` — the only network call on the path

pub mod dispatcher;
pub mod intent;

pub use dispatcher::{Dispatcher, run};
pub use intent::{IntentClassifier, IntentDescriptor};

//! Onboarding — the short conversation that links a workspace to a customer.
//!
//! A user in an unlinked workspace is asked for their company domain. Their
//! next message is taken as the answer and looked up in the backend's
//! customer directory.

pub mod manager;
pub mod state;

pub use manager::{DomainAnswer, DomainLookup, OnboardingManager};
pub use state::{OnboardingPhase, PendingOnboarding};

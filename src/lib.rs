//! Ticket Dispatch — chat messages in, support tickets out.

pub mod backend;
pub mod channels;
pub mod config;
pub mod error;
pub mod onboarding;
pub mod pipeline;
pub mod responses;
pub mod store;
pub mod workspace;

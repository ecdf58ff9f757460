//! Type definitions shared across the orchestration layer.
//!
//! `query` holds the inbound request model, `response` the normalized
//! outbound model, and `chat` the provider-neutral completion shapes that
//! adapters translate to and from their wire formats.

pub mod chat;
pub mod query;
pub mod response;

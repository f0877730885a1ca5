//! Async REST client for the monitoring backend
//!
//! Every operation issues one HTTP request and resolves to exactly one
//! outcome: the parsed payload or an [`crate::Error`] describing the failure.
//! Completion of every request, successful or not, is also broadcast to
//! signal subscribers so a frontend can track connection status without
//! wrapping each call site.

mod client;

pub use client::{ApiClient, ClientSignal};

//! Gatekeeper: multi-party approval workflow plus per-identity settings.
//!
//! The core (`workflow`, `query`, `settings`, `service`) is usable as a
//! plain library; `api` is the axum transport the binary serves.

pub mod api;
pub mod clock;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod notification;
pub mod query;
pub mod rbac;
pub mod service;
pub mod settings;
pub mod store;
pub mod workflow;

pub use service::Gatekeeper;

/// Shared state handed to every HTTP handler.
pub struct AppState {
    pub gatekeeper: Gatekeeper,
    pub config: config::Config,
}

impl AppState {
    pub fn new(gatekeeper: Gatekeeper, config: config::Config) -> Self {
        Self { gatekeeper, config }
    }
}

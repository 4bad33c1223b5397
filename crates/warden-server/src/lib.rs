//! HTTP server for the warden session and token authority.
//!
//! Wires [`warden_auth::Authority`] to a storage backend, mounts the
//! handlers from [`warden_auth::http`] on an axum router and runs the
//! maintenance loop alongside the listener.

pub mod config;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::AppConfig;
pub use server::{WardenServer, build_app, build_authority};

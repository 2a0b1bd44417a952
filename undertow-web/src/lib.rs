//! Undertow Web - HTTP surface of the streaming cache

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
//!
//! Exposes metadata lookup, range streaming, progress reporting and health
//! routes over a shared engine registry.

pub mod handlers;
pub mod server;

// Re-export main types
pub use handlers::ApiError;
pub use server::{AppState, build_router, run_server, serve};

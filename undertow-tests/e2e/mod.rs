//! End-to-end tests for Undertow
//!
//! Each test starts the real server on an ephemeral port and talks to it
//! with an HTTP client, so disconnects are real socket closes.

mod server_fixture;
mod streaming_workflow;
mod unavailable_backend;

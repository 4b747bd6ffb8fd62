#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

//! callvault-daemon - evidence integrity and legal-hold service.
//!
//! Hosts the stateful side of the evidence subsystem: SQLite persistence,
//! the operation service with tenant-scoped authorization, a best-effort
//! audit pipeline, and a newline-delimited JSON server over a Unix domain
//! socket. The pure verification and hold-coverage logic lives in
//! `callvault-core`; this crate wires it to storage and the wire surface.
//!
//! # Modules
//!
//! - [`store`]: SQLite-backed records for manifests, bundles, holds,
//!   calls, memberships, and the audit log
//! - [`service`]: operation layer with authorization and audit emission
//! - [`audit`]: fire-and-forget audit sink and its writer task
//! - [`dispatch`]: typed request/response surface and error taxonomy
//! - [`server`]: Unix-socket accept loop
//! - [`config`]: TOML daemon configuration

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod server;
pub mod service;
pub mod store;

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! callvault-core - Evidence Integrity Domain Model
//!
//! Pure domain crate for the callvault evidence integrity and legal-hold
//! subsystem. Every call produces evidentiary artifacts (recording,
//! transcript, translation, survey, score); this crate defines the sealed
//! manifest/bundle pair that makes those artifacts tamper-evident, the
//! verification logic that cross-checks them, and the legal-hold coverage
//! algebra that decides when a call may be unflagged.
//!
//! No I/O happens here. Persistence and request handling live in
//! `callvault-daemon`.
//!
//! # Modules
//!
//! - [`canonical`]: deterministic JSON serialization and versioned digests
//! - [`artifact`]: artifact references and normalized artifact-hash entries
//! - [`manifest`]: the sealed artifact inventory for a call
//! - [`bundle`]: the custody/retention wrapper around a manifest snapshot
//! - [`hold`]: legal holds and cascading-release coverage computation
//! - [`verify`]: structured verification reports over bundles and manifests
//! - [`actor`]: the typed per-request actor and role model

pub mod actor;
pub mod artifact;
pub mod bundle;
pub mod canonical;
pub mod hold;
pub mod manifest;
pub mod verify;

#![forbid(unsafe_code)]

//! Shared library for the tubedrop download server.
//!
//! The binary under `src/bin/backend.rs` wires these modules into an HTTP
//! surface; everything with testable behaviour lives here so the pieces can
//! be exercised without a running server or a network connection.

pub mod archive;
pub mod batch;
pub mod config;
pub mod convert;
pub mod history;
pub mod provider;
pub mod sanitize;
pub mod security;
pub mod store;
pub mod tasks;

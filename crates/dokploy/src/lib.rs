//! Typed client for the Dokploy tRPC API.
//!
//! Covers the project, compose, deployment, domain, server, and file manager
//! procedures behind the batched envelope wire format, with bounded retries,
//! per-attempt timeouts, and a structured error taxonomy.

#![forbid(unsafe_code)]

mod client;
mod error;
mod models;

pub use client::{DokployClient, DokployConfig};
pub use error::{DokployError, Result};
pub use models::*;

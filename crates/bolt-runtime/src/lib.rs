//! Runtime session lifecycle and remote-workspace control plane.
//!
//! Brokers short-lived per-chat development sessions against a Dokploy
//! instance: provisions or reuses a compose per (actor, chat), seeds it from
//! a template, exposes a preview domain, and leases it out behind a signed
//! token with a sliding idle TTL. An idle sweeper garbage-collects leases
//! that were never renewed.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod files;
pub mod metadata;
pub mod names;
pub mod orchestrator;
pub mod paths;
pub mod platform;
pub mod rollout;
pub mod status;
pub mod sweeper;
pub mod template;
pub mod token;

#[cfg(test)]
mod tests;

pub use config::{ConfigError, RuntimeConfig, RuntimeProvider};
pub use error::{Result, RuntimeError};
pub use files::{FileEntryView, FileReadView, WriteOutcome};
pub use orchestrator::{
    CreateSessionRequest, HeartbeatOutcome, OrchestratorSettings, Session, SessionLease,
    SessionOrchestrator, SessionView,
};
pub use platform::Platform;
pub use rollout::RolloutCohort;
pub use status::{DeploymentStatus, SessionStatus};
pub use sweeper::IdleSweeper;
pub use token::SessionClaims;

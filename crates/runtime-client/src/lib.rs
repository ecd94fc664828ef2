//! Editor-side client for the Bolt runtime control plane.
//!
//! Drives the session lifecycle (create, heartbeat, refresh, teardown),
//! mirrors the remote workspace tree, coalesces file writes, and projects
//! session state into a user-visible preview status.

#![forbid(unsafe_code)]

pub mod api;
pub mod coalescer;
pub mod dircache;
pub mod error;
pub mod mirror;
pub mod preview;
pub mod scheduler;
pub mod session;
pub mod types;

pub use api::{HttpRuntimeApi, RuntimeApi};
pub use coalescer::{WriteCoalescer, WriteRequest, WriteResolution, WriteSink, WriteStatus};
pub use dircache::DirectoryCache;
pub use error::{ClientError, Result};
pub use mirror::{MirrorNode, RemoteFilesMirror};
pub use preview::{PreviewInputs, PreviewSnapshot, PreviewState, Projection, ProjectorMemory};
pub use scheduler::RefreshScheduler;
pub use session::{ConnectionState, EnsureOptions, SessionClient, SessionClientConfig, SessionState};
pub use types::*;

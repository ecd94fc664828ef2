//! Garbage collection of sessions whose idle lease has expired.

use crate::error::Result;
use crate::metadata;
use crate::names;
use crate::platform::Platform;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Outcome of one sweep invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Another sweep for this actor was already running.
    pub skipped: bool,
    /// Composes deleted in this pass.
    pub deleted: usize,
}

/// Periodic cleaner for expired sessions. The per-actor lock is try-and-skip:
/// a second invocation for the same actor returns immediately instead of
/// queueing, which keeps heartbeat-triggered sweeps from piling up.
#[derive(Clone, Default)]
pub struct IdleSweeper {
    active: Arc<Mutex<HashSet<String>>>,
}

struct ActorLock {
    active: Arc<Mutex<HashSet<String>>>,
    actor_id: String,
}

impl Drop for ActorLock {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.actor_id);
        }
    }
}

impl IdleSweeper {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_lock(&self, actor_id: &str) -> Option<ActorLock> {
        let mut active = self.active.lock().ok()?;
        if !active.insert(actor_id.to_string()) {
            return None;
        }
        Some(ActorLock {
            active: Arc::clone(&self.active),
            actor_id: actor_id.to_string(),
        })
    }

    /// Sweep one actor's expired sessions.
    pub async fn run(
        &self,
        platform: &dyn Platform,
        actor_id: &str,
        request_id: Option<&str>,
    ) -> Result<SweepOutcome> {
        let Some(_lock) = self.try_lock(actor_id) else {
            return Ok(SweepOutcome {
                skipped: true,
                deleted: 0,
            });
        };

        let now = Utc::now().timestamp();
        let project_name = names::actor_project_name(actor_id);
        let projects = platform.project_all(request_id).await?;
        let Some(project) = projects.into_iter().find(|p| p.name == project_name) else {
            return Ok(SweepOutcome::default());
        };
        let project = platform.project_one(&project.project_id, request_id).await?;

        let mut deleted = 0;
        for compose in project
            .environments
            .iter()
            .flat_map(|env| env.composes.iter())
        {
            let Some(meta) = metadata::parse(compose.description.as_deref()) else {
                continue;
            };
            if meta.actor_id != actor_id || !meta.is_expired(now) {
                continue;
            }
            match platform
                .compose_delete(&compose.compose_id, true, request_id)
                .await
            {
                Ok(()) => {
                    debug!(
                        actor = %actor_id,
                        compose = %compose.compose_id,
                        "swept expired session"
                    );
                    deleted += 1;
                }
                Err(err) => {
                    warn!(
                        actor = %actor_id,
                        compose = %compose.compose_id,
                        reason = %err,
                        "failed to delete expired session"
                    );
                }
            }
        }
        Ok(SweepOutcome {
            skipped: false,
            deleted,
        })
    }

    /// Sweep every actor found in runtime metadata across all projects.
    /// Returns the number of distinct actors visited.
    pub async fn run_all(
        &self,
        platform: &dyn Platform,
        request_id: Option<&str>,
    ) -> Result<usize> {
        let projects = platform.project_all(request_id).await?;
        let mut actors: HashSet<String> = HashSet::new();
        for project in &projects {
            let full = match platform.project_one(&project.project_id, request_id).await {
                Ok(full) => full,
                Err(err) => {
                    warn!(project = %project.project_id, reason = %err, "skipping project in bulk sweep");
                    continue;
                }
            };
            for compose in full.environments.iter().flat_map(|env| env.composes.iter()) {
                if let Some(meta) = metadata::parse(compose.description.as_deref()) {
                    actors.insert(meta.actor_id);
                }
            }
        }

        let actor_count = actors.len();
        for actor_id in actors {
            if let Err(err) = self.run(platform, &actor_id, request_id).await {
                warn!(actor = %actor_id, reason = %err, "per-actor sweep failed");
            }
        }
        Ok(actor_count)
    }
}

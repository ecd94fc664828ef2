//! Client-side mirror of the remote workspace tree.
//!
//! The mirror never trusts itself over the platform: `refresh_from_remote`
//! re-walks the listing (through the [`DirectoryCache`]) and rebuilds the
//! tree, preserving file contents that were already loaded. Writes go out
//! through the [`WriteCoalescer`] with optimistic local mutation and exact
//! rollback when a commit is rejected.

use crate::api::RuntimeApi;
use crate::coalescer::{WriteCoalescer, WriteRequest, WriteSink, WriteStatus};
use crate::dircache::DirectoryCache;
use crate::error::{ClientError, Result};
use crate::scheduler::RefreshScheduler;
use crate::types::{Encoding, EntryKind};
use async_trait::async_trait;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// The fixed virtual workdir the editor sees.
pub const VIRTUAL_WORKDIR: &str = "/home/project";

/// A node in the mirrored tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorNode {
    Folder,
    File { size: u64 },
}

#[derive(Default)]
struct MirrorState {
    entries: HashMap<String, MirrorNode>,
    contents: HashMap<String, String>,
    loaded: HashSet<String>,
    modified: HashSet<String>,
    total_size: u64,
}

struct RollbackPoint {
    path: String,
    node: Option<MirrorNode>,
    content: Option<String>,
    was_loaded: bool,
    was_modified: bool,
    total_size: u64,
}

type SharedRefresh = Shared<BoxFuture<'static, Result<()>>>;

struct MirrorInner {
    api: Arc<dyn RuntimeApi>,
    cache: DirectoryCache,
    coalescer: WriteCoalescer,
    token: Arc<Mutex<Option<String>>>,
    state: Mutex<MirrorState>,
    refresh_inflight: Mutex<Option<SharedRefresh>>,
}

struct ApiWriteSink {
    api: Arc<dyn RuntimeApi>,
    token: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl WriteSink for ApiWriteSink {
    async fn commit(&self, request: &WriteRequest) -> Result<()> {
        let token = self
            .token
            .lock()
            .expect("token lock")
            .clone()
            .ok_or(ClientError::Api {
                status: 401,
                code: Some("MISSING_RUNTIME_TOKEN".to_string()),
                message: "no active session".to_string(),
            })?;
        self.api
            .write(&token, &request.path, &request.content, request.encoding)
            .await
    }
}

/// The mirror. Cheap to clone; clones share the tree and queues.
#[derive(Clone)]
pub struct RemoteFilesMirror {
    inner: Arc<MirrorInner>,
}

impl RemoteFilesMirror {
    pub fn new(api: Arc<dyn RuntimeApi>) -> Self {
        Self::with_debounce(api, crate::coalescer::DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(api: Arc<dyn RuntimeApi>, debounce: Duration) -> Self {
        let token = Arc::new(Mutex::new(None));
        let sink = Arc::new(ApiWriteSink {
            api: Arc::clone(&api),
            token: Arc::clone(&token),
        });
        Self {
            inner: Arc::new(MirrorInner {
                api,
                cache: DirectoryCache::default(),
                coalescer: WriteCoalescer::with_debounce(sink, debounce),
                token,
                state: Mutex::new(MirrorState::default()),
                refresh_inflight: Mutex::new(None),
            }),
        }
    }

    /// Adopt a (new) session token. Drops every cached listing.
    pub fn set_token(&self, token: Option<String>) {
        *self.inner.token.lock().expect("token lock") = token;
        self.inner.cache.invalidate_all();
    }

    fn token(&self) -> Result<String> {
        self.inner
            .token
            .lock()
            .expect("token lock")
            .clone()
            .ok_or(ClientError::Api {
                status: 401,
                code: Some("MISSING_RUNTIME_TOKEN".to_string()),
                message: "no active session".to_string(),
            })
    }

    /// Current tree snapshot.
    pub fn entries(&self) -> HashMap<String, MirrorNode> {
        self.inner.state.lock().expect("mirror lock").entries.clone()
    }

    /// Loaded content for a file, if any.
    pub fn file_content(&self, virtual_path: &str) -> Option<String> {
        self.inner
            .state
            .lock()
            .expect("mirror lock")
            .contents
            .get(virtual_path)
            .cloned()
    }

    pub fn total_size(&self) -> u64 {
        self.inner.state.lock().expect("mirror lock").total_size
    }

    /// Re-walk the remote tree. Single-flighted: concurrent calls share one
    /// walk. Never fetches file contents.
    pub async fn refresh_from_remote(&self, force: bool) -> Result<()> {
        let task = {
            let mut inflight = self
                .inner
                .refresh_inflight
                .lock()
                .expect("refresh lock");
            match inflight.as_ref() {
                Some(task) => task.clone(),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let task: SharedRefresh =
                        async move { walk_remote(inner, force).await }.boxed().shared();
                    *inflight = Some(task.clone());
                    task
                }
            }
        };

        let result = task.clone().await;
        let mut inflight = self
            .inner
            .refresh_inflight
            .lock()
            .expect("refresh lock");
        if inflight.as_ref().is_some_and(|t| t.ptr_eq(&task)) {
            *inflight = None;
        }
        result
    }

    /// Load a file's content, fetching it on first access.
    pub async fn ensure_file_content(&self, virtual_path: &str) -> Result<String> {
        if let Some(content) = {
            let state = self.inner.state.lock().expect("mirror lock");
            if state.loaded.contains(virtual_path) {
                state.contents.get(virtual_path).cloned()
            } else {
                None
            }
        } {
            return Ok(content);
        }

        let token = self.token()?;
        let file = self.inner.api.read(&token, virtual_path).await?;
        let mut state = self.inner.state.lock().expect("mirror lock");
        let size = file.content.len() as u64;
        apply_file_node(&mut state, virtual_path, size);
        state.contents.insert(virtual_path.to_string(), file.content.clone());
        state.loaded.insert(virtual_path.to_string());
        Ok(file.content)
    }

    /// Save a file: optimistic local update, coalesced remote write, exact
    /// rollback when the commit is rejected. A `Canceled` resolution means a
    /// newer save superseded this one and is not an error.
    pub async fn save_file(&self, virtual_path: &str, content: String) -> Result<WriteStatus> {
        let token = self.token()?;
        self.ensure_parent_folders(&token, virtual_path).await?;
        self.inner.cache.invalidate_token(&token);

        let rollback = {
            let mut state = self.inner.state.lock().expect("mirror lock");
            let rollback = snapshot(&state, virtual_path);
            apply_file_node(&mut state, virtual_path, content.len() as u64);
            state.contents.insert(virtual_path.to_string(), content.clone());
            state.loaded.insert(virtual_path.to_string());
            state.modified.insert(virtual_path.to_string());
            rollback
        };

        let ticket = self.inner.coalescer.enqueue(WriteRequest {
            path: virtual_path.to_string(),
            content,
            encoding: Encoding::Utf8,
        });
        match ticket.await {
            Ok(Ok(resolution)) => Ok(resolution.status),
            Ok(Err(err)) => {
                self.roll_back(rollback);
                Err(err)
            }
            // The coalescer dropped the resolver; treat as superseded.
            Err(_) => Ok(WriteStatus::Canceled),
        }
    }

    pub async fn create_file(&self, virtual_path: &str, content: String) -> Result<WriteStatus> {
        self.save_file(virtual_path, content).await
    }

    pub async fn create_folder(&self, virtual_path: &str) -> Result<()> {
        let token = self.token()?;
        self.ensure_parent_folders(&token, virtual_path).await?;
        self.inner.api.mkdir(&token, virtual_path).await?;
        self.inner.cache.invalidate_token(&token);
        let mut state = self.inner.state.lock().expect("mirror lock");
        state
            .entries
            .insert(virtual_path.to_string(), MirrorNode::Folder);
        Ok(())
    }

    /// Delete a file. Pending coalesced writes for the path are flushed
    /// first, then canceled, so the delete is not overwritten by a straggler.
    pub async fn delete_file(&self, virtual_path: &str) -> Result<()> {
        let token = self.token()?;
        self.inner.coalescer.flush_path(virtual_path).await;
        self.inner.coalescer.cancel_path(virtual_path);
        self.inner.api.delete_path(&token, virtual_path, false).await?;
        self.inner.cache.invalidate_token(&token);
        let mut state = self.inner.state.lock().expect("mirror lock");
        remove_path(&mut state, virtual_path);
        Ok(())
    }

    pub async fn delete_folder(&self, virtual_path: &str) -> Result<()> {
        let token = self.token()?;
        let prefix = format!("{virtual_path}/");
        let subtree = {
            let prefix = prefix.clone();
            move |path: &str| path == virtual_path || path.starts_with(&prefix)
        };
        self.inner.coalescer.flush_matching(&subtree).await;
        self.inner.coalescer.cancel_matching(&subtree);
        self.inner.api.delete_path(&token, virtual_path, true).await?;
        self.inner.cache.invalidate_token(&token);

        let mut state = self.inner.state.lock().expect("mirror lock");
        let doomed: Vec<String> = state
            .entries
            .keys()
            .filter(|path| path.as_str() == virtual_path || path.starts_with(&prefix))
            .cloned()
            .collect();
        for path in doomed {
            remove_path(&mut state, &path);
        }
        Ok(())
    }

    /// Flush every pending write to the platform.
    pub async fn flush_pending_writes(&self) {
        self.inner.coalescer.flush().await;
    }

    /// Periodic refresh driven by the visibility-aware scheduler. The loop
    /// ends when the mirror is dropped.
    pub fn spawn_refresh_loop(&self, scheduler: Arc<Mutex<RefreshScheduler>>) -> JoinHandle<()> {
        let weak: Weak<MirrorInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let delay = scheduler.lock().expect("scheduler lock").next_delay();
                tokio::time::sleep(delay).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let mirror = RemoteFilesMirror { inner };
                if let Err(err) = mirror.refresh_from_remote(false).await {
                    warn!(reason = %err, "periodic workspace refresh failed");
                }
            }
        })
    }

    /// Create missing ancestor folders on the remote, ignoring
    /// already-exists conflicts.
    async fn ensure_parent_folders(&self, token: &str, virtual_path: &str) -> Result<()> {
        for ancestor in parent_folders(virtual_path) {
            let known = {
                let state = self.inner.state.lock().expect("mirror lock");
                state.entries.contains_key(&ancestor)
            };
            if known {
                continue;
            }
            match self.inner.api.mkdir(token, &ancestor).await {
                Ok(()) => {}
                Err(err) if err.status() == Some(409) => {}
                Err(err) => return Err(err),
            }
            let mut state = self.inner.state.lock().expect("mirror lock");
            state.entries.insert(ancestor, MirrorNode::Folder);
        }
        Ok(())
    }

    fn roll_back(&self, point: RollbackPoint) {
        let mut state = self.inner.state.lock().expect("mirror lock");
        match point.node {
            Some(node) => {
                state.entries.insert(point.path.clone(), node);
            }
            None => {
                state.entries.remove(&point.path);
            }
        }
        match point.content {
            Some(content) => {
                state.contents.insert(point.path.clone(), content);
            }
            None => {
                state.contents.remove(&point.path);
            }
        }
        if point.was_loaded {
            state.loaded.insert(point.path.clone());
        } else {
            state.loaded.remove(&point.path);
        }
        if point.was_modified {
            state.modified.insert(point.path.clone());
        } else {
            state.modified.remove(&point.path);
        }
        state.total_size = point.total_size;
    }
}

fn snapshot(state: &MirrorState, path: &str) -> RollbackPoint {
    RollbackPoint {
        path: path.to_string(),
        node: state.entries.get(path).cloned(),
        content: state.contents.get(path).cloned(),
        was_loaded: state.loaded.contains(path),
        was_modified: state.modified.contains(path),
        total_size: state.total_size,
    }
}

fn apply_file_node(state: &mut MirrorState, path: &str, size: u64) {
    let previous = match state.entries.insert(path.to_string(), MirrorNode::File { size }) {
        Some(MirrorNode::File { size }) => size,
        _ => 0,
    };
    state.total_size = state.total_size - previous + size;
}

fn remove_path(state: &mut MirrorState, path: &str) {
    if let Some(MirrorNode::File { size }) = state.entries.remove(path) {
        state.total_size -= size;
    }
    state.contents.remove(path);
    state.loaded.remove(path);
    state.modified.remove(path);
}

/// Ancestor folders of a virtual path, shallowest first, excluding the
/// workdir root itself.
fn parent_folders(virtual_path: &str) -> Vec<String> {
    let Some(relative) = virtual_path.strip_prefix(&format!("{VIRTUAL_WORKDIR}/")) else {
        return Vec::new();
    };
    let mut folders = Vec::new();
    let mut current = VIRTUAL_WORKDIR.to_string();
    let segments: Vec<&str> = relative.split('/').collect();
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
        current = format!("{current}/{segment}");
        folders.push(current.clone());
    }
    folders
}

async fn walk_remote(inner: Arc<MirrorInner>, force: bool) -> Result<()> {
    let token = {
        let guard = inner.token.lock().expect("token lock");
        match guard.as_ref() {
            Some(token) => token.clone(),
            None => return Ok(()),
        }
    };

    let mut discovered: HashMap<String, MirrorNode> = HashMap::new();
    let mut queue = vec![VIRTUAL_WORKDIR.to_string()];
    while let Some(dir) = queue.pop() {
        let listing = {
            let api = Arc::clone(&inner.api);
            let fetch_token = token.clone();
            let fetch_dir = dir.clone();
            inner
                .cache
                .list(&token, &dir, force, move || async move {
                    api.list(&fetch_token, Some(&fetch_dir)).await
                })
                .await?
        };
        for entry in listing.iter() {
            match entry.kind {
                EntryKind::Directory => {
                    discovered.insert(entry.virtual_path.clone(), MirrorNode::Folder);
                    queue.push(entry.virtual_path.clone());
                }
                EntryKind::File => {
                    discovered.insert(
                        entry.virtual_path.clone(),
                        MirrorNode::File { size: entry.size },
                    );
                }
            }
        }
    }

    let mut state = inner.state.lock().expect("mirror lock");
    let mut contents = HashMap::new();
    let mut loaded = HashSet::new();
    for (path, node) in &discovered {
        if matches!(node, MirrorNode::File { .. }) && state.loaded.contains(path) {
            if let Some(content) = state.contents.get(path) {
                contents.insert(path.clone(), content.clone());
                loaded.insert(path.clone());
            }
        }
    }
    state.total_size = discovered
        .values()
        .map(|node| match node {
            MirrorNode::File { size } => *size,
            MirrorNode::Folder => 0,
        })
        .sum();
    let survivors: HashSet<String> = discovered.keys().cloned().collect();
    state.entries = discovered;
    state.contents = contents;
    state.loaded = loaded;
    state.modified.retain(|path| survivors.contains(path));
    Ok(())
}

//! Debounced change notifications for the projects directory.
//!
//! Raw notify events are mapped to `add`, `change` and `unlink` events on
//! `<project>/<path>` documents. Each (kind, path) pair gets its own debounce
//! timer: a new raw event restarts the timer and only the last one is
//! delivered. Different kinds for the same path never merge, so an `unlink`
//! followed by an `add` are both delivered.
//!
//! Files directly under the root, anything under a hidden directory and
//! files without a document extension are ignored.

use crate::config::RetrieverConfig;
use crate::error::{Result, RetrieverError};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;
const RAW_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Change,
    Unlink,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Add => write!(f, "add"),
            ChangeKind::Change => write!(f, "change"),
            ChangeKind::Unlink => write!(f, "unlink"),
        }
    }
}

/// A debounced change to one project document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChangeEvent {
    pub kind: ChangeKind,
    pub project_id: String,
    /// Relative to the project directory, `/`-separated.
    pub path: String,
}

/// Maps a raw notify event to document changes.
pub fn classify(event: &notify::Event) -> Vec<(ChangeKind, PathBuf)> {
    let all = |kind: ChangeKind| -> Vec<(ChangeKind, PathBuf)> {
        event.paths.iter().map(|p| (kind, p.clone())).collect()
    };

    match &event.kind {
        EventKind::Create(_) => all(ChangeKind::Add),
        EventKind::Remove(_) => all(ChangeKind::Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(ChangeKind::Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(ChangeKind::Add),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut changes = Vec::new();
            if let Some(from) = event.paths.first() {
                changes.push((ChangeKind::Unlink, from.clone()));
            }
            if let Some(to) = event.paths.get(1) {
                changes.push((ChangeKind::Add, to.clone()));
            }
            changes
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    ChangeKind::Add
                } else {
                    ChangeKind::Unlink
                };
                (kind, p.clone())
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => all(ChangeKind::Change),
        _ => Vec::new(),
    }
}

struct Pending {
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct WatcherState {
    running: bool,
    watcher: Option<RecommendedWatcher>,
    pump: Option<JoinHandle<()>>,
    pending: HashMap<(ChangeKind, PathBuf), Pending>,
    next_generation: u64,
}

struct Shared {
    root: PathBuf,
    /// The root as the OS reports it in events, when that differs from `root`.
    canonical_root: Option<PathBuf>,
    extensions: Vec<String>,
    debounce: Duration,
    events_tx: mpsc::Sender<FileChangeEvent>,
    state: Mutex<WatcherState>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, WatcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// (project id, project-relative path) for a document path under the root.
    fn locate(&self, path: &Path) -> Option<(String, String)> {
        let relative = path.strip_prefix(&self.root).ok().or_else(|| {
            self.canonical_root
                .as_ref()
                .and_then(|root| path.strip_prefix(root).ok())
        })?;

        let parts = relative
            .components()
            .map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Option<Vec<String>>>()?;

        if parts.len() < 2 || parts.iter().any(|p| p.starts_with('.')) {
            return None;
        }
        let extension = Path::new(parts.last()?).extension()?.to_str()?;
        if !self
            .extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(extension))
        {
            return None;
        }

        Some((parts[0].clone(), parts[1..].join("/")))
    }

    /// Restart the debounce timer for (kind, path).
    fn schedule(self: &Arc<Self>, kind: ChangeKind, path: PathBuf) {
        let Some((project_id, relative)) = self.locate(&path) else {
            return;
        };

        let mut state = self.lock();
        if !state.running {
            return;
        }
        state.next_generation += 1;
        let generation = state.next_generation;
        let key = (kind, path);
        if let Some(previous) = state.pending.remove(&key) {
            previous.timer.abort();
        }

        let event = FileChangeEvent {
            kind,
            project_id,
            path: relative,
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        let debounce = self.debounce;
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            // Stays pending, and cancellable by stop(), until it holds a permit.
            let Ok(permit) = shared.events_tx.reserve().await else {
                debug!("Change receiver dropped, discarding event");
                return;
            };
            let mut state = shared.lock();
            let current = state
                .pending
                .get(&timer_key)
                .is_some_and(|pending| pending.generation == generation);
            if !current || !state.running {
                return;
            }
            state.pending.remove(&timer_key);
            drop(state);
            debug!("File {} {}/{}", event.kind, event.project_id, event.path);
            permit.send(event);
        });

        state.pending.insert(key, Pending { generation, timer });
    }
}

/// Watches `<root>/<project>/...` and emits debounced [`FileChangeEvent`]s.
pub struct FileChangeWatcher {
    shared: Arc<Shared>,
}

impl FileChangeWatcher {
    /// Create a stopped watcher and the receiver its events are delivered to.
    pub fn new(
        root: impl Into<PathBuf>,
        extensions: Vec<String>,
        debounce: Duration,
    ) -> (Self, mpsc::Receiver<FileChangeEvent>) {
        let root = root.into();
        let canonical_root = std::fs::canonicalize(&root)
            .ok()
            .filter(|canonical| *canonical != root);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            root,
            canonical_root,
            extensions,
            debounce,
            events_tx,
            state: Mutex::new(WatcherState::default()),
        });
        (Self { shared }, events_rx)
    }

    pub fn from_config(config: &RetrieverConfig) -> (Self, mpsc::Receiver<FileChangeEvent>) {
        Self::new(
            config.projects_root.clone(),
            config.layout.extensions.clone(),
            config.watcher.debounce(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Start watching. Must be called from within a Tokio runtime.
    /// Starting a running watcher logs a warning and does nothing.
    pub fn start(&self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.running {
            warn!(
                "File watcher for {} is already running",
                self.shared.root.display()
            );
            return Ok(());
        }

        let (raw_tx, mut raw_rx) = mpsc::channel::<notify::Result<notify::Event>>(RAW_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |res| {
            // Runs on the notify thread, outside the runtime.
            let _ = raw_tx.blocking_send(res);
        })
        .map_err(|e| RetrieverError::external("create file watcher", e))?;
        watcher
            .watch(&self.shared.root, RecursiveMode::Recursive)
            .map_err(|e| {
                RetrieverError::external(format!("watch {}", self.shared.root.display()), e)
            })?;

        let weak = Arc::downgrade(&self.shared);
        let pump = tokio::spawn(async move {
            while let Some(res) = raw_rx.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                match res {
                    Ok(event) => {
                        for (kind, path) in classify(&event) {
                            shared.schedule(kind, path);
                        }
                    }
                    Err(e) => warn!("File watcher error: {}", e),
                }
            }
        });

        state.watcher = Some(watcher);
        state.pump = Some(pump);
        state.running = true;
        info!(
            "Watching {} (debounce {:?})",
            self.shared.root.display(),
            self.shared.debounce
        );
        Ok(())
    }

    /// Stop watching and cancel every pending timer. Safe to call when stopped.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        if !state.running {
            return;
        }
        state.running = false;
        state.watcher = None;
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        let cancelled = state.pending.len();
        for (_, pending) in state.pending.drain() {
            pending.timer.abort();
        }
        info!(
            "Stopped watching {} ({} pending events dropped)",
            self.shared.root.display(),
            cancelled
        );
    }

    /// Feed a raw change as if notify had reported it. Relative paths are
    /// resolved against the root. Ignored while stopped.
    pub fn push_raw(&self, kind: ChangeKind, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let path = if path.is_relative() {
            self.shared.root.join(path)
        } else {
            path.to_path_buf()
        };
        self.shared.schedule(kind, path);
    }
}

impl Drop for FileChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use tempfile::TempDir;
    use tokio::time::{advance, timeout};
    use tracing_test::traced_test;

    fn watcher(debounce_ms: u64) -> (TempDir, FileChangeWatcher, mpsc::Receiver<FileChangeEvent>) {
        let dir = TempDir::new().unwrap();
        let (watcher, rx) = FileChangeWatcher::new(
            dir.path(),
            vec!["md".to_string(), "txt".to_string()],
            Duration::from_millis(debounce_ms),
        );
        (dir, watcher, rx)
    }

    async fn assert_quiet(rx: &mut mpsc::Receiver<FileChangeEvent>) {
        let next = timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(next.is_err(), "unexpected event: {next:?}");
    }

    #[test]
    fn test_classify() {
        let path = PathBuf::from("/r/p1/manuscript/a.md");
        let other = PathBuf::from("/r/p1/manuscript/b.md");

        let create = notify::Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        assert_eq!(classify(&create), vec![(ChangeKind::Add, path.clone())]);

        let modify = notify::Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(path.clone());
        assert_eq!(classify(&modify), vec![(ChangeKind::Change, path.clone())]);

        let remove = notify::Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.clone());
        assert_eq!(classify(&remove), vec![(ChangeKind::Unlink, path.clone())]);

        let rename = notify::Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(path.clone())
            .add_path(other.clone());
        assert_eq!(
            classify(&rename),
            vec![(ChangeKind::Unlink, path.clone()), (ChangeKind::Add, other)]
        );

        let metadata = notify::Event::new(EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions,
        )))
        .add_path(path);
        assert!(classify(&metadata).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bursts_collapse_to_one_event() {
        let (_dir, watcher, mut rx) = watcher(500);
        watcher.start().unwrap();

        for _ in 0..3 {
            watcher.push_raw(ChangeKind::Change, "p1/manuscript/a.md");
            advance(Duration::from_millis(100)).await;
        }

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            FileChangeEvent {
                kind: ChangeKind::Change,
                project_id: "p1".to_string(),
                path: "manuscript/a.md".to_string(),
            }
        );
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_kinds_are_debounced_separately() {
        let (_dir, watcher, mut rx) = watcher(200);
        watcher.start().unwrap();

        watcher.push_raw(ChangeKind::Unlink, "p1/notes/a.md");
        watcher.push_raw(ChangeKind::Add, "p1/notes/a.md");

        let mut kinds = vec![rx.recv().await.unwrap().kind, rx.recv().await.unwrap().kind];
        kinds.sort_by_key(|k| k.to_string());
        assert_eq!(kinds, vec![ChangeKind::Add, ChangeKind::Unlink]);
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_paths() {
        let (_dir, watcher, mut rx) = watcher(100);
        watcher.start().unwrap();

        watcher.push_raw(ChangeKind::Add, "loose.md");
        watcher.push_raw(ChangeKind::Add, ".git/p1/a.md");
        watcher.push_raw(ChangeKind::Add, "p1/.obsidian/workspace.md");
        watcher.push_raw(ChangeKind::Add, "p1/manuscript/cover.png");
        watcher.push_raw(ChangeKind::Add, "/elsewhere/p1/manuscript/a.md");

        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_timers() {
        let (_dir, watcher, mut rx) = watcher(300);
        watcher.start().unwrap();

        watcher.push_raw(ChangeKind::Change, "p1/manuscript/a.md");
        watcher.stop();
        assert!(!watcher.is_running());
        assert_quiet(&mut rx).await;

        watcher.push_raw(ChangeKind::Change, "p1/manuscript/a.md");
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drops_events_waiting_on_a_full_channel() {
        let (_dir, watcher, mut rx) = watcher(100);
        watcher.start().unwrap();

        let extra = 20;
        for i in 0..EVENT_CAPACITY + extra {
            watcher.push_raw(ChangeKind::Add, format!("p1/manuscript/ch{i}.md"));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        watcher.stop();

        let mut delivered = 0;
        while let Ok(Some(_)) = timeout(Duration::from_secs(1), rx.recv()).await {
            delivered += 1;
        }
        assert_eq!(delivered, EVENT_CAPACITY);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_start_twice_warns() {
        let (_dir, watcher, _rx) = watcher(100);
        watcher.start().unwrap();
        watcher.start().unwrap();
        assert!(watcher.is_running());
        assert!(logs_contain("already running"));
        watcher.stop();
        watcher.stop();
    }

    #[tokio::test]
    async fn test_start_fails_for_missing_root() {
        let dir = TempDir::new().unwrap();
        let (missing, _rx) = FileChangeWatcher::new(
            dir.path().join("nope"),
            vec!["md".to_string()],
            Duration::from_millis(100),
        );
        assert!(missing.start().is_err());
        assert!(!missing.is_running());
    }

    #[tokio::test]
    async fn test_reports_real_file_writes() {
        let (dir, watcher, mut rx) = watcher(50);
        std::fs::create_dir_all(dir.path().join("p1/manuscript")).unwrap();
        watcher.start().unwrap();

        std::fs::write(dir.path().join("p1/manuscript/new.md"), "# New\n").unwrap();

        let event = timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.project_id, "p1");
        assert_eq!(event.path, "manuscript/new.md");
        assert!(matches!(event.kind, ChangeKind::Add | ChangeKind::Change));
        watcher.stop();
    }
}

//! Directory-backed store.
//!
//! Layout: every regular file below the root is one item, keyed by its
//! `/`-joined path relative to the root.
//!
//! ```text
//! <root>/
//! ├─ app.toml              # key "app.toml"
//! └─ nginx/
//!    └─ site.conf          # key "nginx/site.conf"
//! ```
//!
//! Directory watching is not done here. The embedding process runs its own
//! watcher and reports changes through a [`DirWatcher`]; the store's watch
//! thread turns them into events, reads file content and applies echo
//! suppression.

use confsync_core::{
    event_channel, validate_key, ConfEvent, ConfItem, ConfStore, EchoSuppressor, EventSink,
    EventStream, Offer, StoreError, StoreOptions, StoreResult, StreamSlot, KEY_SEPARATOR,
};
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug)]
enum Notice {
    Changed(PathBuf),
    Removed(PathBuf),
}

type NoticeSender = Arc<Mutex<Option<Sender<Notice>>>>;

/// Handle through which an external watcher reports filesystem changes.
///
/// Paths may be absolute (under the store root) or relative to the root.
/// Every method returns false once the store is closed.
#[derive(Debug, Clone)]
pub struct DirWatcher {
    tx: NoticeSender,
}

impl DirWatcher {
    /// Reports that a file was written.
    pub fn changed(&self, path: impl Into<PathBuf>) -> bool {
        self.send(Notice::Changed(path.into()))
    }

    /// Reports that a file or directory was created.
    pub fn created(&self, path: impl Into<PathBuf>) -> bool {
        self.send(Notice::Changed(path.into()))
    }

    /// Reports that a file was removed.
    pub fn removed(&self, path: impl Into<PathBuf>) -> bool {
        self.send(Notice::Removed(path.into()))
    }

    fn send(&self, notice: Notice) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(notice).is_ok(),
            None => false,
        }
    }
}

/// A store over a directory tree.
///
/// # Example
///
/// ```rust
/// use confsync_core::{ConfStore, StoreOptions};
/// use confsync_store::DirStore;
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = DirStore::open(dir.path(), &StoreOptions::default()).unwrap();
///
/// store.put("nginx/site.conf", b"listen 80;").unwrap();
/// assert!(dir.path().join("nginx").join("site.conf").is_file());
/// store.close().unwrap();
/// ```
pub struct DirStore {
    root: PathBuf,
    echo: Arc<EchoSuppressor>,
    stream: StreamSlot,
    notices: NoticeSender,
    watcher: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl DirStore {
    /// Opens a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Setup`] if `root` is not an existing directory
    /// or the watch thread cannot be started.
    pub fn open(root: &Path, options: &StoreOptions) -> StoreResult<Self> {
        if !root.is_dir() {
            return Err(StoreError::Setup(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let root = root.canonicalize().map_err(|err| {
            StoreError::Setup(format!("cannot resolve {}: {err}", root.display()))
        })?;

        let echo = Arc::new(EchoSuppressor::with_window(options.suppression_window));
        let (sink, stream) =
            event_channel(options.event_queue_capacity, format!("dir:{}", root.display()));
        let (tx, rx) = mpsc::channel();

        let watcher = {
            let echo = Arc::clone(&echo);
            let watch_root = root.clone();
            thread::Builder::new()
                .name("confsync-dir-watch".into())
                .spawn(move || watch_loop(&watch_root, &rx, &sink, &echo))
                .map_err(|err| StoreError::Setup(format!("cannot start watch thread: {err}")))?
        };

        tracing::debug!(root = %root.display(), "opened directory store");
        Ok(Self {
            root,
            echo,
            stream: StreamSlot::new(stream),
            notices: Arc::new(Mutex::new(Some(tx))),
            watcher: Mutex::new(Some(watcher)),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the canonical root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns a handle for reporting filesystem changes.
    #[must_use]
    pub fn watcher(&self) -> DirWatcher {
        DirWatcher {
            tx: Arc::clone(&self.notices),
        }
    }

    /// Returns the number of live suppressions for `key`.
    #[must_use]
    pub fn pending_suppressions(&self, key: &str) -> usize {
        self.echo.pending(key)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split(KEY_SEPARATOR)
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// A write the watcher never sees has no echo to swallow.
    fn withdraw_suppression(&self, key: &str) {
        if self.echo.withdraw(key) {
            tracing::debug!(root = %self.root.display(), key = %key, "withdrew unused suppression");
        }
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Why a path has no store key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unmapped {
    /// The path is not below the root.
    OutsideRoot,
    /// The path is below the root but is not UTF-8 or breaks the key rules.
    InvalidKey,
}

/// Maps a reported path to a store key.
fn key_for(root: &Path, path: &Path) -> Result<String, Unmapped> {
    let rel = if path.is_absolute() {
        path.strip_prefix(root).map_err(|_| Unmapped::OutsideRoot)?
    } else {
        path
    };

    let mut segments = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(segment) => {
                segments.push(segment.to_str().ok_or(Unmapped::InvalidKey)?);
            }
            Component::ParentDir => return Err(Unmapped::OutsideRoot),
            _ => return Err(Unmapped::InvalidKey),
        }
    }
    let key = segments.join("/");
    validate_key(&key).map_err(|_| Unmapped::InvalidKey)?;
    Ok(key)
}

fn watch_loop(root: &Path, notices: &Receiver<Notice>, sink: &EventSink, echo: &EchoSuppressor) {
    for notice in notices {
        let (path, removed) = match &notice {
            Notice::Changed(path) => (path, false),
            Notice::Removed(path) => (path, true),
        };
        let key = match key_for(root, path) {
            Ok(key) => key,
            Err(Unmapped::OutsideRoot) => {
                tracing::debug!(path = %path.display(), "ignoring path outside root");
                continue;
            }
            Err(Unmapped::InvalidKey) => {
                tracing::warn!(path = %path.display(), "ignoring path without a valid key");
                continue;
            }
        };
        let full = root.join(path);

        let event = if removed {
            ConfEvent::delete(key)
        } else if full.is_dir() {
            continue;
        } else {
            match fs::read(&full) {
                Ok(content) => ConfEvent::put(key, content),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(path = %full.display(), "file vanished before read");
                    ConfEvent::delete(key)
                }
                Err(err) => {
                    tracing::error!(path = %full.display(), error = %err, "cannot read changed file");
                    continue;
                }
            }
        };

        if sink.offer(event, echo) == Offer::Closed {
            break;
        }
    }
    tracing::debug!(root = %root.display(), "watch thread stopped");
}

fn walk(root: &Path, dir: &Path, items: &mut Vec<ConfItem>) -> StoreResult<()> {
    let entries = fs::read_dir(dir).map_err(|err| walk_error(dir, &err))?;
    for entry in entries {
        let entry = entry.map_err(|err| walk_error(dir, &err))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|err| walk_error(&path, &err))?;

        if file_type.is_dir() {
            walk(root, &path, items)?;
            continue;
        }
        if file_type.is_symlink() {
            // Symlinked files are items; symlinked directories are not descended.
            match fs::metadata(&path) {
                Ok(target) if target.is_file() => {}
                Ok(_) => {
                    tracing::debug!(path = %path.display(), "not following symlinked directory");
                    continue;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(path = %path.display(), "skipping dangling symlink");
                    continue;
                }
                Err(err) => return Err(walk_error(&path, &err)),
            }
        } else if !file_type.is_file() {
            continue;
        }

        let Ok(key) = key_for(root, &path) else {
            tracing::warn!(path = %path.display(), "skipping file without a valid key");
            continue;
        };
        let content = fs::read(&path).map_err(|err| walk_error(&path, &err))?;
        items.push(ConfItem::new(key, content));
    }
    Ok(())
}

fn write_file(path: &Path, content: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

fn walk_error(path: &Path, err: &io::Error) -> StoreError {
    StoreError::Enumerate(format!("walking {}: {err}", path.display()))
}

impl ConfStore for DirStore {
    fn describe(&self) -> String {
        format!("dir:{}", self.root.display())
    }

    fn enumerate(&self) -> StoreResult<Vec<ConfItem>> {
        self.check_open()?;
        let mut items = Vec::new();
        walk(&self.root, &self.root, &mut items)?;
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }

    fn stream(&self) -> StoreResult<EventStream> {
        self.check_open()?;
        self.stream.take()
    }

    fn put(&self, key: &str, content: &[u8]) -> StoreResult<()> {
        validate_key(key)?;
        self.check_open()?;
        let path = self.path_for(key);
        let result = write_file(&path, content);
        match &result {
            Ok(()) => tracing::debug!(path = %path.display(), "written file"),
            Err(_) => self.withdraw_suppression(key),
        }
        result
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        validate_key(key)?;
        self.check_open()?;
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "removed file");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.withdraw_suppression(key);
                Ok(())
            }
            Err(err) => {
                self.withdraw_suppression(key);
                Err(err.into())
            }
        }
    }

    fn suppress_next(&self, key: &str) {
        self.echo.suppress_next(key);
    }

    fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        self.notices.lock().take();
        self.stream.discard();
        if let Some(handle) = self.watcher.lock().take() {
            if handle.join().is_err() {
                tracing::error!(root = %self.root.display(), "watch thread panicked");
            }
        }
        self.echo.clear();
        tracing::debug!(root = %self.root.display(), "store closed");
        Ok(())
    }
}

impl Drop for DirStore {
    fn drop(&mut self) {
        self.notices.lock().take();
    }
}

impl std::fmt::Debug for DirStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirStore")
            .field("root", &self.root)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

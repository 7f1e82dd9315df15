//! Reindex coordinator: brings one workspace's index up to date.
//!
//! ## Pass structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  discover root  →  diff against stored watermarks            │
//! │                                                              │
//! │  rayon pool:  added ∪ modified                               │
//! │    stat (watermark) → read → extract → IndexWriter::apply    │
//! │                                                              │
//! │  remove deleted files (when asked, skipped on cancel)        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The watermark is the mtime observed *before* the file is read, so an edit
//! that lands during extraction leaves the file looking modified next time.
//!
//! Each file's commit also relinks other files' edges that name its
//! entities, so the graph is consistent after every commit, not only at the
//! end of the pass.
//!
//! Per-file failures go into [`ReindexReport::errors`]; only infrastructure
//! failures end the pass.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::changes::{self, ChangeSet, IndexSnapshot};
use crate::config::Config;
use crate::error::{Error, IndexError, IndexErrorKind, Result};
use crate::languages::extract_bytes;
use crate::store::{FileWrite, GraphStore};
use crate::types::{Language, ReindexReport, WorkspaceContext};
use crate::writer::IndexWriter;

/// Cooperative cancellation flag shared between a caller and a reindex pass.
///
/// Once cancelled, no new file starts; files already in flight finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Workspaces with a reindex in progress.
#[derive(Debug, Default)]
pub struct ReindexGuards {
    active: Mutex<HashSet<String>>,
}

impl ReindexGuards {
    /// Create an empty guard table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a workspace for reindexing.
    ///
    /// Fails immediately with [`Error::ConcurrentReindex`] when it is already
    /// claimed. The claim is released when the returned guard drops.
    pub fn acquire(&self, workspace: &str) -> Result<ReindexGuard<'_>> {
        let mut active = self
            .active
            .lock()
            .map_err(|e| Error::Internal(format!("reindex guard table poisoned: {e}")))?;
        if !active.insert(workspace.to_string()) {
            return Err(Error::ConcurrentReindex(workspace.to_string()));
        }
        Ok(ReindexGuard {
            guards: self,
            workspace: workspace.to_string(),
        })
    }

    /// Returns `true` while a reindex of `workspace` is running.
    #[must_use]
    pub fn is_active(&self, workspace: &str) -> bool {
        self.active
            .lock()
            .is_ok_and(|active| active.contains(workspace))
    }
}

/// Exclusive claim on one workspace; released on drop.
#[derive(Debug)]
pub struct ReindexGuard<'a> {
    guards: &'a ReindexGuards,
    workspace: String,
}

impl Drop for ReindexGuard<'_> {
    fn drop(&mut self) {
        match self.guards.active.lock() {
            Ok(mut active) => {
                active.remove(&self.workspace);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&self.workspace);
            }
        }
    }
}

/// Options for one reindex pass.
#[derive(Debug, Clone, Default)]
pub struct ReindexOptions {
    /// Root to index; must match the registered root when given
    pub root: Option<PathBuf>,
    /// Remove files that disappeared from disk
    pub remove_stale: bool,
}

/// What happened to one file of the pass.
enum FileOutcome {
    /// Written; carries the relinked edge count and per-entity embedding errors
    Written(usize, Vec<IndexError>),
    /// Nothing written; previous data (if any) is intact
    Failed(IndexError),
    /// Not started because the pass was cancelled
    Skipped,
}

/// Drives reindex passes for registered workspaces.
pub struct Coordinator<'a> {
    config: &'a Config,
    graph: &'a dyn GraphStore,
    writer: IndexWriter<'a>,
    guards: &'a ReindexGuards,
}

impl<'a> Coordinator<'a> {
    /// Create a coordinator over the given store and writer.
    #[must_use]
    pub fn new(
        config: &'a Config,
        graph: &'a dyn GraphStore,
        writer: IndexWriter<'a>,
        guards: &'a ReindexGuards,
    ) -> Self {
        Self {
            config,
            graph,
            writer,
            guards,
        }
    }

    /// Bring the workspace's index in line with its files on disk.
    ///
    /// # Errors
    ///
    /// - [`Error::ConcurrentReindex`] when a pass for this workspace is running
    /// - [`Error::ContextMismatch`] when `options.root` is not the registered root
    /// - [`Error::NotFound`] when the root directory is gone
    pub fn reindex(
        &self,
        context: &WorkspaceContext,
        options: &ReindexOptions,
        cancel: &CancellationToken,
    ) -> Result<ReindexReport> {
        let _guard = self.guards.acquire(&context.name)?;
        self.check_root(context, options.root.as_deref())?;
        self.run(context, options.remove_stale, cancel)
    }

    /// Drop everything indexed for the workspace, then index it from scratch.
    pub fn rebuild(
        &self,
        context: &WorkspaceContext,
        cancel: &CancellationToken,
    ) -> Result<ReindexReport> {
        let _guard = self.guards.acquire(&context.name)?;
        self.check_root(context, None)?;
        info!(workspace = %context.name, "Clearing index for rebuild");
        self.graph.clear_namespace(&context.storage_namespace)?;
        self.run(context, true, cancel)
    }

    /// The change set a reindex would process, without doing any work.
    pub fn staleness(&self, context: &WorkspaceContext) -> Result<ChangeSet> {
        self.check_root(context, None)?;
        let discovery = changes::discover(&context.root_path, self.config);
        let snapshot =
            IndexSnapshot::from_records(self.graph.file_records(&context.storage_namespace)?);
        Ok(changes::diff(&discovery.files, &snapshot))
    }

    fn check_root(&self, context: &WorkspaceContext, root: Option<&Path>) -> Result<()> {
        if let Some(root) = root {
            let canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
            if canonical != context.root_path {
                warn!(
                    workspace = %context.name,
                    expected = %context.root_path.display(),
                    found = %canonical.display(),
                    "Reindex root does not match the registered root"
                );
                return Err(Error::ContextMismatch {
                    expected: context.root_path.display().to_string(),
                    found: canonical.display().to_string(),
                });
            }
        }
        if !context.root_path.is_dir() {
            return Err(Error::NotFound(format!(
                "root directory {} of workspace '{}'",
                context.root_path.display(),
                context.name
            )));
        }
        Ok(())
    }

    fn run(
        &self,
        context: &WorkspaceContext,
        remove_stale: bool,
        cancel: &CancellationToken,
    ) -> Result<ReindexReport> {
        let start = Instant::now();
        let namespace = context.storage_namespace.as_str();
        let mut report = ReindexReport {
            workspace: context.name.clone(),
            ..ReindexReport::default()
        };

        let discovery = changes::discover(&context.root_path, self.config);
        let unreadable: Vec<PathBuf> = discovery
            .unreadable_dirs
            .iter()
            .map(|(dir, _)| relative_to(&context.root_path, dir))
            .collect();
        report.errors.extend(discovery.unreadable_dirs.iter().map(|(dir, reason)| {
            IndexError::new(
                relative_to(&context.root_path, dir),
                IndexErrorKind::IoError,
                format!("cannot read directory: {reason}"),
            )
        }));

        let snapshot = IndexSnapshot::from_records(self.graph.file_records(namespace)?);
        let changes = changes::diff(&discovery.files, &snapshot);
        report.unchanged = changes.unchanged.len();

        info!(
            workspace = %context.name,
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            unchanged = changes.unchanged.len(),
            "Starting reindex"
        );

        let added: HashSet<&PathBuf> = changes.added.iter().collect();
        let work: Vec<&PathBuf> = changes.to_extract().collect();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build worker pool: {e}")))?;
        let outcomes: Vec<(&PathBuf, FileOutcome)> = pool.install(|| {
            work.par_iter()
                .map(|path| (*path, self.index_file(context, path, cancel)))
                .collect()
        });

        for (path, outcome) in outcomes {
            match outcome {
                FileOutcome::Written(relinked, errors) => {
                    if added.contains(path) {
                        report.added += 1;
                    } else {
                        report.updated += 1;
                    }
                    report.relationships_linked += relinked;
                    report.errors.extend(errors);
                }
                FileOutcome::Failed(error) => report.errors.push(error),
                FileOutcome::Skipped => {}
            }
        }

        report.cancelled = cancel.is_cancelled();
        if report.cancelled {
            info!(workspace = %context.name, "Reindex cancelled; skipping stale removal");
        } else if remove_stale {
            for path in &changes.deleted {
                // Files under a directory we could not read are not known to be gone
                if unreadable.iter().any(|dir| path.starts_with(dir)) {
                    debug!(path = %path.display(), "Keeping file under unreadable directory");
                    continue;
                }
                match self.writer.remove(context, path) {
                    Ok(removed) => {
                        report.removed += 1;
                        report.relationships_linked += removed.relinked;
                    }
                    Err(e) => report
                        .errors
                        .push(IndexError::store_write_failed(path.clone(), &e)),
                }
            }
        }

        report.errors.sort_by(|a, b| a.path.cmp(&b.path));
        report.duration = start.elapsed();
        info!(
            workspace = %context.name,
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            errors = report.errors.len(),
            linked = report.relationships_linked,
            cancelled = report.cancelled,
            duration_ms = report.duration.as_millis(),
            "Reindex complete"
        );
        Ok(report)
    }

    fn index_file(
        &self,
        context: &WorkspaceContext,
        path: &Path,
        cancel: &CancellationToken,
    ) -> FileOutcome {
        if cancel.is_cancelled() {
            return FileOutcome::Skipped;
        }
        match self.try_index_file(context, path) {
            Ok((relinked, errors)) => FileOutcome::Written(relinked, errors),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    kind = %error.kind,
                    error = %error.message,
                    "Failed to index file"
                );
                FileOutcome::Failed(error)
            }
        }
    }

    fn try_index_file(
        &self,
        context: &WorkspaceContext,
        path: &Path,
    ) -> std::result::Result<(usize, Vec<IndexError>), IndexError> {
        let language = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Language::from_extension)
            .ok_or_else(|| IndexError::unsupported_language(path.to_path_buf()))?;
        let absolute = context.root_path.join(path);

        let metadata = std::fs::metadata(&absolute)
            .map_err(|e| IndexError::io_error(path.to_path_buf(), &e))?;
        let watermark = changes::mtime_ns(&metadata).ok_or_else(|| {
            IndexError::new(
                path.to_path_buf(),
                IndexErrorKind::IoError,
                "cannot read modification time",
            )
        })?;
        let bytes =
            std::fs::read(&absolute).map_err(|e| IndexError::io_error(path.to_path_buf(), &e))?;

        let extraction = extract_bytes(&bytes, path, language)
            .map_err(|e| e.into_index_error(path.to_path_buf()))?;
        let file = FileWrite {
            path,
            language,
            watermark,
            size_bytes: bytes.len() as u64,
            content_hash: Some(xxhash_rust::xxh3::xxh3_64(&bytes)),
        };

        match self.writer.apply(context, &file, &extraction) {
            Ok(outcome) => Ok((outcome.relinked, outcome.embedding_errors)),
            Err(e @ Error::ContextMismatch { .. }) => Err(IndexError::new(
                path.to_path_buf(),
                IndexErrorKind::ContextMismatch,
                e.to_string(),
            )),
            Err(e) => Err(IndexError::store_write_failed(path.to_path_buf(), &e)),
        }
    }
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Index;
    use crate::embedding::HashingEmbedder;
    use crate::writer::{FileLocks, RetryPolicy};
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _data: TempDir,
        root: TempDir,
        index: Index,
        config: Config,
        embedder: HashingEmbedder,
        locks: FileLocks,
        guards: ReindexGuards,
    }

    impl Fixture {
        fn new() -> Self {
            let data = tempfile::tempdir().expect("data dir");
            let root = tempfile::tempdir().expect("root dir");
            let index = Index::open(&data.path().join("cairn.db")).expect("open");
            Self {
                _data: data,
                root,
                index,
                config: Config::default(),
                embedder: HashingEmbedder::new(16),
                locks: FileLocks::new(),
                guards: ReindexGuards::new(),
            }
        }

        fn context(&self) -> WorkspaceContext {
            WorkspaceContext {
                name: "demo".to_string(),
                root_path: self.root.path().canonicalize().expect("canonical root"),
                storage_namespace: WorkspaceContext::namespace_for("demo"),
                registered_at: Utc::now(),
            }
        }

        fn coordinator(&self) -> Coordinator<'_> {
            let writer = IndexWriter::new(
                &self.index,
                &self.index,
                &self.embedder,
                &self.locks,
                RetryPolicy::new(1, 1),
            );
            Coordinator::new(&self.config, &self.index, writer, &self.guards)
        }

        fn write(&self, path: &str, content: &str) {
            let full = self.root.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).expect("mkdir");
            }
            fs::write(full, content).expect("write");
        }
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn guard_rejects_second_claim_until_dropped() {
        let guards = ReindexGuards::new();
        let first = guards.acquire("demo").expect("first claim");
        assert!(matches!(
            guards.acquire("demo"),
            Err(Error::ConcurrentReindex(name)) if name == "demo"
        ));
        assert!(guards.acquire("other").is_ok(), "other workspaces are independent");
        drop(first);
        assert!(!guards.is_active("demo"));
        assert!(guards.acquire("demo").is_ok());
    }

    #[test]
    fn reindex_indexes_new_files() {
        let fx = Fixture::new();
        fx.write("a.py", "def a():\n    pass\n");
        fx.write("pkg/b.py", "class B:\n    pass\n");

        let report = fx
            .coordinator()
            .reindex(&fx.context(), &ReindexOptions::default(), &CancellationToken::new())
            .expect("reindex");

        assert_eq!(report.added, 2);
        assert_eq!(report.updated, 0);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert!(!report.cancelled);
    }

    #[test]
    fn pre_cancelled_token_does_no_work() {
        let fx = Fixture::new();
        fx.write("a.py", "def a():\n    pass\n");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = fx
            .coordinator()
            .reindex(&fx.context(), &ReindexOptions::default(), &cancel)
            .expect("reindex");

        assert!(report.cancelled);
        assert_eq!(report.files_written(), 0);
        let namespace = fx.context().storage_namespace;
        assert!(fx.index.file_records(&namespace).expect("records").is_empty());
    }

    #[test]
    fn mismatched_root_is_rejected() {
        let fx = Fixture::new();
        let elsewhere = tempfile::tempdir().expect("other dir");
        let options = ReindexOptions {
            root: Some(elsewhere.path().to_path_buf()),
            remove_stale: false,
        };

        let err = fx
            .coordinator()
            .reindex(&fx.context(), &options, &CancellationToken::new())
            .expect_err("root differs");
        assert!(matches!(err, Error::ContextMismatch { .. }));
    }

    #[test]
    fn running_reindex_blocks_a_second_one() {
        let fx = Fixture::new();
        let _held = fx.guards.acquire("demo").expect("claim");

        let err = fx
            .coordinator()
            .reindex(&fx.context(), &ReindexOptions::default(), &CancellationToken::new())
            .expect_err("already running");
        assert!(matches!(err, Error::ConcurrentReindex(_)));
    }

    #[test]
    fn staleness_reports_without_writing() {
        let fx = Fixture::new();
        fx.write("a.py", "def a():\n    pass\n");

        let changes = fx.coordinator().staleness(&fx.context()).expect("staleness");
        assert_eq!(changes.added, vec![PathBuf::from("a.py")]);
        let namespace = fx.context().storage_namespace;
        assert!(fx.index.file_records(&namespace).expect("records").is_empty());
    }

    #[test]
    fn rebuild_reindexes_everything() {
        let fx = Fixture::new();
        fx.write("a.py", "def a():\n    pass\n");
        let coordinator = fx.coordinator();
        let cancel = CancellationToken::new();
        coordinator
            .reindex(&fx.context(), &ReindexOptions::default(), &cancel)
            .expect("first pass");

        let report = coordinator.rebuild(&fx.context(), &cancel).expect("rebuild");
        assert_eq!(report.added, 1);
        assert_eq!(report.unchanged, 0);
    }
}

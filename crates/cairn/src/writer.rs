//! Index writer: applies one file's extraction to the dual store.
//!
//! ## Write protocol for one `(namespace, path)`
//!
//! ```text
//! 1. compute embeddings            (no lock held; may be slow)
//! 2. take the per-file lock
//! 3. graph transaction:            delete old rows → insert entities →
//!                                  insert relationships → relink inbound
//!                                  edges → upsert watermark
//! 4. vector rows for new entities  (after commit, lock still held)
//! 5. release the lock
//! ```
//!
//! A graph failure fails the file and leaves its previous rows, vectors
//! included, untouched. Old vectors leave with their entities. A vector
//! failure is reported per entity and leaves the graph data in place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::embedding::{Embedder, EmbeddingInput, embedding_text};
use crate::error::{Error, IndexError, IndexErrorKind, Result};
use crate::languages::common::normalize_path;
use crate::languages::{Extraction, FILE_ENTITY};
use crate::store::{FileWrite, GraphStore, RemovedFile, VectorStore};
use crate::types::{EntityId, WorkspaceContext};

/// Locks above this count trigger pruning of idle entries.
const PRUNE_THRESHOLD: usize = 1024;

/// Keyed mutual exclusion for `(namespace, path)`.
///
/// Writes to distinct files proceed independently; two writes to the same
/// file serialize.
#[derive(Debug, Default)]
pub struct FileLocks {
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl FileLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lock for one file, creating it on first use.
    pub fn handle(&self, namespace: &str, path: &Path) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| Error::Internal(format!("file lock table poisoned: {e}")))?;
        if locks.len() > PRUNE_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Ok(Arc::clone(
            locks
                .entry((namespace.to_string(), normalize_path(path)))
                .or_default(),
        ))
    }

    /// Number of files with a lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().map_or(0, |l| l.len())
    }

    /// Returns `true` if no file has a lock entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exponential backoff for transient store errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay before the second attempt; doubles each time
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Build a policy from attempt count and base delay in milliseconds.
    #[must_use]
    pub fn new(attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// Run `op`, retrying while it fails with a transient error.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = self.base_delay.saturating_mul(1 << (attempt - 1).min(16));
                    tracing::warn!(
                        operation = what,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Transient store error, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Result of applying one file.
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    /// New entity ids, in extraction order
    pub entity_ids: Vec<EntityId>,
    /// Relationships written
    pub relationships: usize,
    /// Other files' edges resolved by this write
    pub relinked: usize,
    /// Vectors written
    pub vectors: usize,
    /// Entities whose embedding could not be computed or stored
    pub embedding_errors: Vec<IndexError>,
}

/// Applies extractions to the graph and vector stores.
pub struct IndexWriter<'a> {
    graph: &'a dyn GraphStore,
    vectors: &'a dyn VectorStore,
    embedder: &'a dyn Embedder,
    locks: &'a FileLocks,
    retry: RetryPolicy,
}

impl<'a> IndexWriter<'a> {
    /// Create a writer over the given stores.
    #[must_use]
    pub fn new(
        graph: &'a dyn GraphStore,
        vectors: &'a dyn VectorStore,
        embedder: &'a dyn Embedder,
        locks: &'a FileLocks,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            graph,
            vectors,
            embedder,
            locks,
            retry,
        }
    }

    /// Replace everything stored for `file.path` with `extraction`.
    ///
    /// Fails with [`Error::StoreWrite`] when the graph write fails after
    /// retries, or [`Error::ContextMismatch`] when an edge crosses workspaces.
    pub fn apply(
        &self,
        context: &WorkspaceContext,
        file: &FileWrite<'_>,
        extraction: &Extraction,
    ) -> Result<ApplyOutcome> {
        let namespace = context.storage_namespace.as_str();
        let mut outcome = ApplyOutcome::default();
        let embeddings = self.embed(extraction, &mut outcome.embedding_errors);

        let lock = self.locks.handle(namespace, file.path)?;
        let _guard = lock
            .lock()
            .map_err(|e| Error::Internal(format!("file lock poisoned: {e}")))?;

        let written = self
            .retry
            .run("replace_file", || {
                self.graph.replace_file(namespace, file, extraction)
            })
            .map_err(|e| store_write_error(file.path, e))?;
        let ids = written.entity_ids;

        let items: Vec<(EntityId, Vec<f32>)> = embeddings
            .into_iter()
            .filter_map(|(index, vector)| ids.get(index).map(|id| (*id, vector)))
            .collect();
        outcome.vectors = self.write_vectors(
            namespace,
            file.path,
            extraction,
            &ids,
            items,
            &mut outcome.embedding_errors,
        );
        outcome.relationships = extraction.relationships.len();
        outcome.relinked = written.relinked;
        outcome.entity_ids = ids;

        tracing::debug!(
            workspace = %context.name,
            path = %file.path.display(),
            entities = outcome.entity_ids.len(),
            relationships = outcome.relationships,
            relinked = outcome.relinked,
            vectors = outcome.vectors,
            embedding_errors = outcome.embedding_errors.len(),
            "Applied file"
        );
        Ok(outcome)
    }

    /// Delete everything stored for `path`, including its file record.
    pub fn remove(&self, context: &WorkspaceContext, path: &Path) -> Result<RemovedFile> {
        let namespace = context.storage_namespace.as_str();
        let lock = self.locks.handle(namespace, path)?;
        let _guard = lock
            .lock()
            .map_err(|e| Error::Internal(format!("file lock poisoned: {e}")))?;

        let removed = self
            .retry
            .run("remove_file", || self.graph.remove_file(namespace, path))
            .map_err(|e| store_write_error(path, e))?;

        tracing::debug!(
            workspace = %context.name,
            path = %path.display(),
            entities = removed.entities,
            relinked = removed.relinked,
            "Removed file"
        );
        Ok(removed)
    }

    /// Embed every non-file entity; failures become per-entity errors.
    fn embed(
        &self,
        extraction: &Extraction,
        errors: &mut Vec<IndexError>,
    ) -> Vec<(usize, Vec<f32>)> {
        let path = normalize_path(&extraction.path);
        let indices: Vec<usize> = (0..extraction.entities.len())
            .filter(|i| *i != FILE_ENTITY)
            .collect();
        let texts: Vec<String> = indices
            .iter()
            .map(|i| embedding_text(&embedding_input(extraction, *i, &path)))
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        if let Ok(vectors) = self.embedder.embed_batch(&refs)
            && vectors.len() == indices.len()
        {
            return indices.into_iter().zip(vectors).collect();
        }

        // Batch failed: isolate the failing entities
        let mut vectors = Vec::with_capacity(indices.len());
        for (index, text) in indices.into_iter().zip(&texts) {
            match self.embedder.embed(text) {
                Ok(vector) => vectors.push((index, vector)),
                Err(e) => errors.push(embedding_failed(extraction, index, &e)),
            }
        }
        vectors
    }

    /// Write vectors, falling back to one entity at a time when the batch fails.
    fn write_vectors(
        &self,
        namespace: &str,
        path: &Path,
        extraction: &Extraction,
        ids: &[EntityId],
        items: Vec<(EntityId, Vec<f32>)>,
        errors: &mut Vec<IndexError>,
    ) -> usize {
        if items.is_empty() {
            return 0;
        }
        let model = self.embedder.name();
        let batch = self
            .retry
            .run("upsert_vectors", || self.vectors.upsert_vectors(namespace, model, &items));
        if batch.is_ok() {
            return items.len();
        }

        let mut written = 0;
        for item in items {
            match self.vectors.upsert_vectors(namespace, model, std::slice::from_ref(&item)) {
                Ok(()) => written += 1,
                Err(e) => {
                    let index = ids.iter().position(|id| *id == item.0).unwrap_or(FILE_ENTITY);
                    tracing::warn!(
                        path = %path.display(),
                        entity = %item.0,
                        error = %e,
                        "Vector write failed"
                    );
                    errors.push(embedding_failed(extraction, index, &e));
                }
            }
        }
        written
    }
}

fn embedding_input<'e>(
    extraction: &'e Extraction,
    index: usize,
    path: &'e str,
) -> EmbeddingInput<'e> {
    let entity = &extraction.entities[index];
    EmbeddingInput {
        kind: entity.kind,
        name: &entity.name,
        signature: entity.signature.as_deref(),
        docstring: entity.metadata.docstring.as_deref(),
        file_path: path,
        outgoing: extraction
            .relationships
            .iter()
            .filter(|r| r.from == index)
            .map(|r| (r.kind, extraction.target_name(r)))
            .collect(),
    }
}

fn embedding_failed(extraction: &Extraction, index: usize, error: &Error) -> IndexError {
    let name = extraction
        .entities
        .get(index)
        .map_or("<unknown>", |e| e.name.as_str());
    IndexError::new(
        extraction.path.clone(),
        IndexErrorKind::EmbeddingFailed,
        format!("{name}: {error}"),
    )
}

/// Wrap a graph failure for one file; context violations pass through.
fn store_write_error(path: &Path, error: Error) -> Error {
    match error {
        Error::ContextMismatch { .. } => error,
        other => Error::StoreWrite {
            path: PathBuf::from(path),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Index;
    use crate::embedding::HashingEmbedder;
    use crate::embedding::tests::FailingEmbedder;
    use crate::languages::extract;
    use crate::types::Language;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Index, WorkspaceContext) {
        let dir = tempfile::tempdir().expect("temp dir");
        let index = Index::open(&dir.path().join("cairn.db")).expect("open");
        let context = WorkspaceContext {
            name: "demo".to_string(),
            root_path: dir.path().to_path_buf(),
            storage_namespace: WorkspaceContext::namespace_for("demo"),
            registered_at: Utc::now(),
        };
        (dir, index, context)
    }

    fn vector_count(index: &Index, ctx: &WorkspaceContext) -> usize {
        index.stats(&ctx.name, &ctx.storage_namespace).expect("stats").vectors
    }

    /// Graph store whose file writes always fail; everything else is real.
    struct RejectingGraph<'a>(&'a Index);

    impl GraphStore for RejectingGraph<'_> {
        fn file_records(&self, namespace: &str) -> Result<Vec<crate::types::FileRecord>> {
            self.0.file_records(namespace)
        }

        fn replace_file(
            &self,
            _namespace: &str,
            _file: &FileWrite<'_>,
            _extraction: &Extraction,
        ) -> Result<crate::store::WrittenFile> {
            Err(Error::Internal("disk full".to_string()))
        }

        fn remove_file(&self, _namespace: &str, _path: &Path) -> Result<RemovedFile> {
            Err(Error::Internal("disk full".to_string()))
        }

        fn clear_namespace(&self, namespace: &str) -> Result<()> {
            self.0.clear_namespace(namespace)
        }
    }

    fn file(path: &Path) -> FileWrite<'_> {
        FileWrite {
            path,
            language: Language::Python,
            watermark: 7,
            size_bytes: 10,
            content_hash: None,
        }
    }

    #[test]
    fn apply_writes_graph_and_vectors() {
        let (_dir, index, ctx) = setup();
        let embedder = HashingEmbedder::new(32);
        let locks = FileLocks::new();
        let writer = IndexWriter::new(&index, &index, &embedder, &locks, RetryPolicy::new(3, 1));
        let path = Path::new("svc.py");
        let ex = extract("class Svc:\n    def run(self):\n        pass\n", path, Language::Python)
            .expect("parse");

        let outcome = writer.apply(&ctx, &file(path), &ex).expect("apply");

        assert_eq!(outcome.entity_ids.len(), 3);
        assert_eq!(outcome.vectors, 2, "file entity is not embedded");
        assert!(outcome.embedding_errors.is_empty());
        assert_eq!(vector_count(&index, &ctx), 2);
    }

    #[test]
    fn failed_graph_write_keeps_previous_vectors() {
        let (_dir, index, ctx) = setup();
        let embedder = HashingEmbedder::new(16);
        let locks = FileLocks::new();
        let path = Path::new("svc.py");
        let ex = extract("class Svc:\n    def run(self):\n        pass\n", path, Language::Python)
            .expect("parse");
        IndexWriter::new(&index, &index, &embedder, &locks, RetryPolicy::new(1, 1))
            .apply(&ctx, &file(path), &ex)
            .expect("first apply");
        assert_eq!(vector_count(&index, &ctx), 2);

        let rejecting = RejectingGraph(&index);
        let retry = RetryPolicy::new(1, 1);
        let writer = IndexWriter::new(&rejecting, &index, &embedder, &locks, retry);
        let changed = extract("class Svc:\n    pass\n", path, Language::Python).expect("parse");

        let err = writer.apply(&ctx, &file(path), &changed).expect_err("graph write fails");
        assert!(matches!(err, Error::StoreWrite { .. }), "got {err:?}");
        assert!(writer.remove(&ctx, path).is_err());

        assert_eq!(vector_count(&index, &ctx), 2);
        assert_eq!(index.list_entities(&ctx.storage_namespace, path).expect("list").len(), 3);
        let query = embedder.embed("Svc").expect("embed");
        let hits = index
            .search_vectors(&ctx.storage_namespace, &query, 5, -1.0)
            .expect("search");
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn embedding_failure_keeps_graph_data() {
        let (_dir, index, ctx) = setup();
        let embedder = FailingEmbedder {
            marker: "Broken",
            inner: HashingEmbedder::new(16),
        };
        let locks = FileLocks::new();
        let writer = IndexWriter::new(&index, &index, &embedder, &locks, RetryPolicy::new(1, 1));
        let path = Path::new("m.py");
        let ex = extract("class Broken:\n    pass\nclass Fine:\n    pass\n", path, Language::Python)
            .expect("parse");

        let outcome = writer.apply(&ctx, &file(path), &ex).expect("graph write succeeds");

        assert_eq!(outcome.entity_ids.len(), 3);
        assert_eq!(outcome.vectors, 1);
        assert_eq!(outcome.embedding_errors.len(), 1);
        assert_eq!(outcome.embedding_errors[0].kind, IndexErrorKind::EmbeddingFailed);
        assert!(outcome.embedding_errors[0].message.contains("Broken"));
    }

    #[test]
    fn remove_deletes_file_data() {
        let (_dir, index, ctx) = setup();
        let embedder = HashingEmbedder::new(8);
        let locks = FileLocks::new();
        let writer = IndexWriter::new(&index, &index, &embedder, &locks, RetryPolicy::new(1, 1));
        let path = Path::new("a.py");
        let ex = extract("def f():\n    pass\n", path, Language::Python).expect("parse");
        writer.apply(&ctx, &file(path), &ex).expect("apply");

        assert_eq!(writer.remove(&ctx, path).expect("remove").entities, 2);
        assert!(index.file_records(&ctx.storage_namespace).expect("records").is_empty());
        assert_eq!(vector_count(&index, &ctx), 0);
    }

    #[test]
    fn retry_stops_after_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 0);
        let result = policy.run("op", || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                    None,
                )))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.expect("third attempt succeeds"), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_gives_up_on_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::new(5, 0).run("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Internal("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn file_locks_share_entries_per_file() {
        let locks = FileLocks::new();
        let a1 = locks.handle("ns", Path::new("a.rs")).expect("lock");
        let a2 = locks.handle("ns", Path::new("a.rs")).expect("lock");
        let b = locks.handle("ns", Path::new("b.rs")).expect("lock");
        let other = locks.handle("other", Path::new("a.rs")).expect("lock");

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert!(!Arc::ptr_eq(&a1, &other));
        assert_eq!(locks.len(), 3);
    }
}

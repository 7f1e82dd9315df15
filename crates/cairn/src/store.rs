//! Store traits for the dual index.
//!
//! The graph store holds files, entities, and relationships; the vector store
//! holds one embedding per entity. Both are partitioned by storage namespace.
//! [`Index`](crate::db::Index) implements both over one `SQLite` database.

use std::path::Path;

use crate::db::Index;
use crate::error::Result;
use crate::languages::Extraction;
use crate::types::{EntityId, FileRecord, Language};

/// File-level facts written alongside one file's extraction.
#[derive(Debug, Clone, Copy)]
pub struct FileWrite<'a> {
    /// Path relative to the workspace root
    pub path: &'a Path,
    /// Detected language
    pub language: Language,
    /// mtime (ns since epoch) observed before the file was read
    pub watermark: i64,
    /// File size in bytes
    pub size_bytes: u64,
    /// xxh3 hash of the content
    pub content_hash: Option<u64>,
}

/// Result of replacing one file's graph data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrittenFile {
    /// New entity ids, in extraction order
    pub entity_ids: Vec<EntityId>,
    /// Other files' edges resolved (or re-resolved) by this write
    pub relinked: usize,
}

/// Result of removing one file's graph data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovedFile {
    /// Entities deleted
    pub entities: usize,
    /// Other files' edges that found another target
    pub relinked: usize,
}

/// Graph side of the dual index.
pub trait GraphStore: Send + Sync {
    /// All file records of a namespace.
    fn file_records(&self, namespace: &str) -> Result<Vec<FileRecord>>;

    /// Replace one file's entities and owned relationships, then upsert its record.
    ///
    /// Atomic: readers see the file's old rows or its new rows, never a mix.
    /// Edges of other files that name this file's entities are re-resolved in
    /// the same commit. The file's embeddings go with its entities.
    fn replace_file(
        &self,
        namespace: &str,
        file: &FileWrite<'_>,
        extraction: &Extraction,
    ) -> Result<WrittenFile>;

    /// Delete one file's entities, owned relationships, embeddings, and record.
    fn remove_file(&self, namespace: &str, path: &Path) -> Result<RemovedFile>;

    /// Delete everything stored for a namespace.
    fn clear_namespace(&self, namespace: &str) -> Result<()>;
}

/// Vector side of the dual index.
pub trait VectorStore: Send + Sync {
    /// Insert or replace the embeddings of several entities.
    fn upsert_vectors(&self, namespace: &str, model: &str, items: &[(EntityId, Vec<f32>)])
    -> Result<()>;

    /// Entities of one namespace most similar to `query`, best first.
    ///
    /// Scores below `min_score` are dropped; at most `limit` hits are returned.
    fn search_vectors(
        &self,
        namespace: &str,
        query: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<(EntityId, f32)>>;
}

impl GraphStore for Index {
    fn file_records(&self, namespace: &str) -> Result<Vec<FileRecord>> {
        Index::file_records(self, namespace)
    }

    fn replace_file(
        &self,
        namespace: &str,
        file: &FileWrite<'_>,
        extraction: &Extraction,
    ) -> Result<WrittenFile> {
        self.write_file_atomic(namespace, file, extraction)
    }

    fn remove_file(&self, namespace: &str, path: &Path) -> Result<RemovedFile> {
        self.remove_file_atomic(namespace, path)
    }

    fn clear_namespace(&self, namespace: &str) -> Result<()> {
        Index::clear_namespace(self, namespace)
    }
}

impl VectorStore for Index {
    fn upsert_vectors(
        &self,
        namespace: &str,
        model: &str,
        items: &[(EntityId, Vec<f32>)],
    ) -> Result<()> {
        Index::upsert_vectors(self, namespace, model, items)
    }

    fn search_vectors(
        &self,
        namespace: &str,
        query: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<(EntityId, f32)>> {
        Index::search_vectors(self, namespace, query, limit, min_score)
    }
}

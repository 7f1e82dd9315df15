//! # Cairn: Workspace-Isolated Code Knowledge Graph
//!
//! Cairn indexes Rust, C#, and Python source trees into a dual store: a
//! graph of code entities and their relationships, plus one embedding per
//! entity for semantic search. Both live in a single `SQLite` file.
//!
//! ## Design Philosophy
//!
//! - **Workspaces never mix** - every row carries its workspace's storage
//!   namespace, and every query derives its scope from the node it starts at
//! - **Materialized view** - the index is re-derived per file (delete, then
//!   insert) whenever the file's mtime passes its recorded watermark
//! - **Best effort per file** - one broken file is reported, never fatal
//! - **Library first, CLI second**
//!
//! ## Quick Start
//!
//! ```no_run
//! use cairn::{Cairn, CancellationToken, Config, ReindexOptions};
//! use std::path::Path;
//!
//! let cairn = Cairn::open(Config::with_data_dir(".cairn"))?;
//! let workspace = cairn.register_workspace(Path::new("/path/to/service"), None)?;
//!
//! let options = ReindexOptions::default();
//! let report = cairn.reindex(&workspace.name, &options, &CancellationToken::new())?;
//! println!("{} added, {} updated", report.added, report.updated);
//!
//! for impact in cairn.impact_analysis("OrderService", None)? {
//!     println!("{} has {} dependents", impact.target.name, impact.impacted.len());
//! }
//! # Ok::<(), cairn::Error>(())
//! ```

pub mod changes;
pub mod config;
mod db;
pub mod embedding;
mod error;
pub mod graph;
pub mod languages;
pub mod registry;
pub mod reindex;
pub mod store;
mod types;
pub mod writer;

pub use changes::ChangeSet;
pub use config::Config;
pub use db::Index;
pub use embedding::{Embedder, HashingEmbedder};
pub use error::{Error, IndexError, IndexErrorKind, Result};
pub use reindex::{CancellationToken, ReindexOptions};
pub use types::{
    Cycle, Dependency, DependencyChain, Entity, EntityId, EntityKind, EntityMetadata, FileRecord,
    ImpactReport, ImpactedEntity, Language, ReindexReport, Relationship, RelationshipKind,
    RelationshipProperties, SearchHit, TypeFlavor, WorkspaceContext, WorkspaceStats,
};

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use graph::{GraphQueries, QueryLimits};
use registry::Registry;
use reindex::{Coordinator, ReindexGuards};
use writer::{FileLocks, IndexWriter, RetryPolicy};

/// Code knowledge graph and semantic index over registered workspaces.
///
/// `Cairn` owns the database, the workspace registry, and the embedder. It is
/// `Sync`: queries and reindexes of different workspaces may run from
/// several threads at once.
pub struct Cairn {
    config: Config,
    index: Index,
    registry: Registry,
    embedder: Box<dyn Embedder>,
    locks: FileLocks,
    guards: ReindexGuards,
}

impl std::fmt::Debug for Cairn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cairn")
            .field("index", &self.index)
            .field("embedder", &self.embedder.name())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::missing_errors_doc)]
impl Cairn {
    /// Open (or create) the index described by `config`.
    ///
    /// Uses the built-in [`HashingEmbedder`] with `config.embedding_dimensions`.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let index = Index::open(&config.database_path())?;
        let registry = Registry::load(&index)?;
        let embedder = Box::new(HashingEmbedder::new(config.embedding_dimensions));
        debug!(database = %index.path().display(), "Opened Cairn");
        Ok(Self {
            config,
            index,
            registry,
            embedder,
            locks: FileLocks::new(),
            guards: ReindexGuards::new(),
        })
    }

    /// Replace the embedding provider.
    ///
    /// Vectors written by a provider with different dimensions are ignored
    /// by search until the workspace is rebuilt.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Box<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying store, for lower-level queries.
    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    // === Workspaces ===

    /// Register a directory as a workspace (name defaults to the directory name).
    pub fn register_workspace(&self, path: &Path, name: Option<&str>) -> Result<WorkspaceContext> {
        self.registry.register(&self.index, path, name)
    }

    /// Remove a workspace and all of its indexed data.
    ///
    /// Holds the workspace's reindex claim for the whole removal, so a pass
    /// cannot start halfway through it. Fails with
    /// [`Error::ConcurrentReindex`] while a pass is running.
    pub fn unregister_workspace(&self, name: &str) -> Result<WorkspaceContext> {
        let _guard = self.guards.acquire(name)?;
        self.registry.unregister(&self.index, name)
    }

    /// All registered workspaces, ordered by name.
    pub fn list_workspaces(&self) -> Result<Vec<WorkspaceContext>> {
        self.registry.list()
    }

    /// Look up a workspace, failing with [`Error::NotFound`] when absent.
    pub fn workspace(&self, name: &str) -> Result<WorkspaceContext> {
        self.registry.resolve(name)
    }

    // === Indexing ===

    /// Incrementally bring a workspace's index up to date.
    pub fn reindex(
        &self,
        workspace: &str,
        options: &ReindexOptions,
        cancel: &CancellationToken,
    ) -> Result<ReindexReport> {
        let context = self.registry.resolve(workspace)?;
        self.coordinator().reindex(&context, options, cancel)
    }

    /// Clear a workspace's index and index every file again.
    pub fn rebuild(&self, workspace: &str, cancel: &CancellationToken) -> Result<ReindexReport> {
        let context = self.registry.resolve(workspace)?;
        let report = self.coordinator().rebuild(&context, cancel)?;
        self.index.analyze()?;
        Ok(report)
    }

    /// Files a reindex would add, update, or remove (dry run).
    pub fn staleness(&self, workspace: &str) -> Result<ChangeSet> {
        let context = self.registry.resolve(workspace)?;
        self.coordinator().staleness(&context)
    }

    fn coordinator(&self) -> Coordinator<'_> {
        let writer = IndexWriter::new(
            &self.index,
            &self.index,
            self.embedder.as_ref(),
            &self.locks,
            RetryPolicy::new(self.config.store_retry_attempts, self.config.store_retry_base_ms),
        );
        Coordinator::new(&self.config, &self.index, writer, &self.guards)
    }

    // === Graph queries ===

    /// Everything that transitively depends on entities named `name`.
    ///
    /// `workspace_hint` only selects which entities are analyzed; each
    /// traversal stays inside its target's own workspace.
    pub fn impact_analysis(
        &self,
        name: &str,
        workspace_hint: Option<&str>,
    ) -> Result<Vec<ImpactReport>> {
        let namespace = self.hint_namespace(workspace_hint)?;
        graph::impact_analysis(
            &self.index,
            name,
            namespace.as_deref(),
            self.limits(),
            |ns| self.workspace_name(ns),
        )
    }

    /// What entities named `name` transitively depend on.
    ///
    /// `max_depth` defaults to the configured maximum and is clamped to it.
    pub fn dependency_chain(
        &self,
        name: &str,
        max_depth: Option<u32>,
        workspace_hint: Option<&str>,
    ) -> Result<Vec<DependencyChain>> {
        let namespace = self.hint_namespace(workspace_hint)?;
        graph::dependency_chain(
            &self.index,
            name,
            max_depth.unwrap_or(self.config.max_traversal_depth),
            namespace.as_deref(),
            self.limits(),
            |ns| self.workspace_name(ns),
        )
    }

    /// Dependency cycles between types, in one workspace or in each of them.
    pub fn find_circular_dependencies(&self, workspace: Option<&str>) -> Result<Vec<Cycle>> {
        let namespaces = match workspace {
            Some(name) => vec![self.registry.resolve(name)?.storage_namespace],
            None => self
                .registry
                .list()?
                .into_iter()
                .map(|w| w.storage_namespace)
                .collect(),
        };
        graph::find_cycles(&self.index, &namespaces)
    }

    /// Entities with a direct call to the given entity.
    pub fn callers(&self, id: EntityId) -> Result<Vec<Entity>> {
        GraphQueries::callers(&self.index, id)
    }

    /// Entities defined in one file of a workspace, in source order.
    pub fn list_entities(&self, workspace: &str, path: &Path) -> Result<Vec<Entity>> {
        let context = self.registry.resolve(workspace)?;
        self.index.list_entities(&context.storage_namespace, path)
    }

    /// Entities matching a qualified or simple name.
    pub fn find_entities(&self, name: &str, workspace_hint: Option<&str>) -> Result<Vec<Entity>> {
        let namespace = self.hint_namespace(workspace_hint)?;
        self.index.find_entities(name, namespace.as_deref())
    }

    /// Get an entity by id.
    pub fn get_entity(&self, id: EntityId) -> Result<Option<Entity>> {
        self.index.get_entity(id)
    }

    /// Outgoing relationships of an entity.
    pub fn relationships_from(&self, id: EntityId) -> Result<Vec<Relationship>> {
        self.index.relationships_from(id)
    }

    // === Search ===

    /// Entities of one workspace most similar to a natural-language query.
    pub fn search(
        &self,
        query: &str,
        workspace: &str,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<SearchHit>> {
        let context = self.registry.resolve(workspace)?;
        let vector = self.embedder.embed(query)?;
        let hits = self
            .index
            .search_vectors(&context.storage_namespace, &vector, limit, min_score)?;

        let ids: Vec<EntityId> = hits.iter().map(|(id, _)| *id).collect();
        let mut entities: HashMap<EntityId, Entity> = self
            .index
            .get_entities(&ids)?
            .into_iter()
            .map(|e| (e.id, e))
            .collect();
        Ok(hits
            .into_iter()
            .filter_map(|(id, score)| {
                entities
                    .remove(&id)
                    .map(|entity| SearchHit { entity, score })
            })
            .collect())
    }

    // === Stats ===

    /// Counts for one workspace.
    pub fn stats(&self, workspace: &str) -> Result<WorkspaceStats> {
        let context = self.registry.resolve(workspace)?;
        self.index.stats(&context.name, &context.storage_namespace)
    }

    fn limits(&self) -> QueryLimits {
        QueryLimits {
            impact_limit: self.config.impact_limit,
            chain_limit: self.config.chain_limit,
            max_depth: self.config.max_traversal_depth,
        }
    }

    fn hint_namespace(&self, hint: Option<&str>) -> Result<Option<String>> {
        hint.map(|name| self.registry.resolve(name).map(|w| w.storage_namespace))
            .transpose()
    }

    fn workspace_name(&self, namespace: &str) -> String {
        self.registry
            .name_for_namespace(namespace)
            .ok()
            .flatten()
            .unwrap_or_else(|| namespace.to_string())
    }
}

//! Domain types for Cairn.
//!
//! These types represent the core domain model:
//! - **Tenancy**: `WorkspaceContext` (one isolated project)
//! - **Stored**: `FileRecord`, `Entity`, `Relationship`
//! - **Results**: `ReindexReport`, `ImpactReport`, `DependencyChain`, `Cycle`,
//!   `SearchHit`, `IndexStats`
//!
//! ## Design Decisions
//!
//! | Decision | Choice | Rationale |
//! |----------|--------|-----------|
//! | Namespace | Derived from name only | Same name always maps to the same partition |
//! | Entity ids | `SQLite` rowids | Stable while the owning file is unchanged |
//! | Edge target | Nullable id + name | Edges survive the target file being re-extracted |
//! | Metadata | Typed struct, JSON column | Schema-free storage, typed access |

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::IndexError;

// ============================================================================
// Strongly-typed ID wrappers
// ============================================================================

/// A strongly-typed entity ID.
///
/// Keeps entity ids from being confused with relationship ids or raw counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl EntityId {
    /// Extract the raw i64 value.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Workspaces
// ============================================================================

/// One isolated tenant: a named source tree and its storage partition.
///
/// Immutable once registered. Every entity, relationship, vector, and file
/// record carries the `storage_namespace` of the workspace it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceContext {
    /// User-facing workspace name (unique)
    pub name: String,
    /// Canonical root directory of the source tree
    pub root_path: PathBuf,
    /// Partition key used in both stores
    pub storage_namespace: String,
    /// When the workspace was first registered
    pub registered_at: DateTime<Utc>,
}

impl WorkspaceContext {
    /// Derive the storage namespace for a workspace name.
    ///
    /// The slug keeps namespaces readable; the hash suffix keeps names that
    /// slug identically (`my-app` and `my_app`) in separate partitions.
    #[must_use]
    pub fn namespace_for(name: &str) -> String {
        let slug: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        let slug = slug.trim_matches('_');
        let slug = if slug.is_empty() { "workspace" } else { slug };

        let digest = Sha256::digest(name.as_bytes());
        let hash8: String = digest
            .iter()
            .take(4)
            .map(|b| format!("{b:02x}"))
            .collect();

        format!("ws_{slug}_{hash8}")
    }
}

// ============================================================================
// Enums
// ============================================================================

/// Supported programming languages.
///
/// Adding a new language requires implementing the `LanguageExtractor` trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Rust source files (`.rs`)
    Rust,
    /// C# source files (`.cs`)
    CSharp,
    /// Python source files (`.py`)
    Python,
}

impl Language {
    /// Every supported language.
    pub const ALL: [Language; 3] = [Self::Rust, Self::CSharp, Self::Python];

    /// File extensions handled by this language.
    #[must_use]
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["rs"],
            Self::CSharp => &["cs"],
            Self::Python => &["py"],
        }
    }

    /// Detect language from file extension.
    ///
    /// # Returns
    ///
    /// `None` if the extension is not recognized.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "rs" => Some(Self::Rust),
            "cs" => Some(Self::CSharp),
            "py" => Some(Self::Python),
            _ => None,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::CSharp => "csharp",
            Self::Python => "python",
        }
    }

    /// Separator between a type name and its members in qualified names.
    #[must_use]
    pub fn member_separator(&self) -> &'static str {
        match self {
            Self::Rust => "::",
            Self::CSharp | Self::Python => ".",
        }
    }
}

/// Entity variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A source file
    File,
    /// Class, struct, interface, trait, enum, record, or module
    Type,
    /// Method, function, or constructor
    Method,
    /// Property, field, or attribute
    Property,
}

impl EntityKind {
    /// Convert to database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Type => "type",
            Self::Method => "method",
            Self::Property => "property",
        }
    }
}

/// Flavor of a `Type` entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFlavor {
    /// Class (C#, Python)
    Class,
    /// Struct (Rust, C#)
    Struct,
    /// Interface (C#)
    Interface,
    /// Trait (Rust)
    Trait,
    /// Enum type
    Enum,
    /// Record (C#)
    Record,
    /// Module (Rust `mod`)
    Module,
}

impl TypeFlavor {
    /// Convert to database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Interface => "interface",
            Self::Trait => "trait",
            Self::Enum => "enum",
            Self::Record => "record",
            Self::Module => "module",
        }
    }
}

/// Typed relationship kinds.
///
/// The vocabulary is shared across languages; not every extractor emits every kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// Parent (file or type) defines a child entity
    Defines,
    /// Method calls another method
    Calls,
    /// Type inherits from a base class
    Inherits,
    /// Type implements an interface or trait
    Implements,
    /// File imports a module or namespace
    Imports,
    /// Method raises an exception type
    Throws,
    /// Method catches an exception type
    Catches,
    /// Entity references a type (parameter, field, annotation)
    UsesType,
    /// Method returns a type
    ReturnsType,
    /// Constructor receives a dependency
    Injects,
    /// Entity is decorated with an attribute
    HasAttribute,
}

impl RelationshipKind {
    /// Every relationship kind.
    pub const ALL: [RelationshipKind; 11] = [
        Self::Defines,
        Self::Calls,
        Self::Inherits,
        Self::Implements,
        Self::Imports,
        Self::Throws,
        Self::Catches,
        Self::UsesType,
        Self::ReturnsType,
        Self::Injects,
        Self::HasAttribute,
    ];

    /// Kinds that make the source entity depend on the target.
    ///
    /// Impact analysis and dependency chains traverse only these.
    pub const DEPENDENCY: [RelationshipKind; 6] = [
        Self::Inherits,
        Self::Implements,
        Self::UsesType,
        Self::ReturnsType,
        Self::Injects,
        Self::Calls,
    ];

    /// Convert to database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Defines => "defines",
            Self::Calls => "calls",
            Self::Inherits => "inherits",
            Self::Implements => "implements",
            Self::Imports => "imports",
            Self::Throws => "throws",
            Self::Catches => "catches",
            Self::UsesType => "uses_type",
            Self::ReturnsType => "returns_type",
            Self::Injects => "injects",
            Self::HasAttribute => "has_attribute",
        }
    }

    /// Parse the database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Returns `true` if this kind is traversed by dependency queries.
    #[must_use]
    pub fn is_dependency(&self) -> bool {
        Self::DEPENDENCY.contains(self)
    }

    /// Returns `true` if the target should resolve to a type entity.
    #[must_use]
    pub fn targets_type(&self) -> bool {
        matches!(
            self,
            Self::Inherits
                | Self::Implements
                | Self::UsesType
                | Self::ReturnsType
                | Self::Injects
                | Self::Throws
                | Self::Catches
        )
    }
}

// ============================================================================
// Stored entities
// ============================================================================

/// Language-specific entity metadata, stored as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// `async` function or method
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_async: bool,
    /// Static member
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_static: bool,
    /// Declared visibility (`public`, `private`, `crate`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    /// Cyclomatic complexity estimate (methods only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<u32>,
    /// Number of source lines spanned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_count: Option<u32>,
    /// Number of declared parameters (methods only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_count: Option<u32>,
    /// Documentation text (Python docstrings, `///` comments)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
}

/// A structural code element stored in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Database id
    pub id: EntityId,
    /// Storage namespace of the owning workspace
    pub namespace: String,
    /// Entity variant
    pub kind: EntityKind,
    /// Flavor for `Type` entities
    pub flavor: Option<TypeFlavor>,
    /// Qualified name (`Type.member`, `Type::member`, or the file path)
    pub name: String,
    /// Unqualified name
    pub simple_name: String,
    /// Owning file, relative to the workspace root
    pub file_path: PathBuf,
    /// First line (1-indexed)
    pub start_line: u32,
    /// Last line (1-indexed)
    pub end_line: u32,
    /// Declaration signature without body
    pub signature: Option<String>,
    /// Language-specific data
    pub metadata: EntityMetadata,
}

/// Extra provenance attached to a relationship.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipProperties {
    /// Source line of the edge (1-indexed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Receiver expression text for member calls (`repo` in `repo.save()`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    /// Receiver type, only when statically evident
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred_type: Option<String>,
    /// Target did not resolve to an entity of the same workspace
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unresolved: bool,
}

/// A typed, directed edge between two entities of one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Database id
    pub id: i64,
    /// Edge type
    pub kind: RelationshipKind,
    /// Source entity
    pub from_entity: EntityId,
    /// Target entity, `None` while unresolved
    pub to_entity: Option<EntityId>,
    /// Name the target is resolved by
    pub target_name: String,
    /// Storage namespace (equal to both endpoints' namespace)
    pub namespace: String,
    /// File that owns this edge (the source entity's file)
    pub file_path: PathBuf,
    /// Provenance
    pub properties: RelationshipProperties,
}

/// Per-file synchronization record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Storage namespace
    pub namespace: String,
    /// Detected language
    pub language: Language,
    /// Watermark: file mtime (ns since epoch) observed before the last read
    pub last_indexed_at: i64,
    /// Wall-clock time of the last successful write (ns since epoch)
    pub indexed_at: i64,
    /// File size in bytes
    pub size_bytes: u64,
    /// xxh3 hash of the content
    pub content_hash: Option<u64>,
}

// ============================================================================
// Results
// ============================================================================

/// Result of a reindex pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexReport {
    /// Workspace name
    pub workspace: String,
    /// New files indexed
    pub added: usize,
    /// Modified files re-indexed
    pub updated: usize,
    /// Deleted files removed from the index
    pub removed: usize,
    /// Files left untouched
    pub unchanged: usize,
    /// Per-file failures (never abort the pass)
    pub errors: Vec<IndexError>,
    /// The pass was cancelled before completing
    pub cancelled: bool,
    /// Wall-clock duration of the pass
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Other files' edges linked or re-linked by this pass's file commits
    pub relationships_linked: usize,
}

impl ReindexReport {
    /// Files that were extracted and written successfully.
    #[must_use]
    pub fn files_written(&self) -> usize {
        self.added + self.updated
    }
}

/// An entity reached by impact analysis.
#[derive(Debug, Clone, Serialize)]
pub struct ImpactedEntity {
    /// The dependent entity
    pub entity: Entity,
    /// Number of edges between it and the target
    pub distance: u32,
    /// Kind of the edge through which it was first reached
    pub via: RelationshipKind,
}

/// Everything that depends on one target entity.
#[derive(Debug, Clone, Serialize)]
pub struct ImpactReport {
    /// The analyzed entity
    pub target: Entity,
    /// Workspace the analysis ran in (the target's workspace)
    pub workspace: String,
    /// Dependents ordered by distance, then name
    pub impacted: Vec<ImpactedEntity>,
    /// Results were cut at the configured limit
    pub truncated: bool,
}

/// One step of a dependency chain.
#[derive(Debug, Clone, Serialize)]
pub struct Dependency {
    /// The entity depended upon
    pub entity: Entity,
    /// Path length from the root
    pub depth: u32,
    /// Kind of the edge through which it was first reached
    pub via: RelationshipKind,
}

/// What one root entity depends on, nearest first.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyChain {
    /// The queried entity
    pub root: Entity,
    /// Workspace the traversal ran in (the root's workspace)
    pub workspace: String,
    /// Dependencies ordered by depth ascending
    pub dependencies: Vec<Dependency>,
    /// Results were cut at the configured limit
    pub truncated: bool,
}

/// A dependency cycle between types of one workspace.
#[derive(Debug, Clone, Serialize)]
pub struct Cycle {
    /// Namespace shared by every member
    pub namespace: String,
    /// Members in cycle order; the last depends on the first
    pub entities: Vec<Entity>,
}

/// A semantic search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Matching entity
    pub entity: Entity,
    /// Cosine similarity to the query
    pub score: f32,
}

/// Counts for one workspace.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkspaceStats {
    /// Workspace name
    pub workspace: String,
    /// Indexed files
    pub files: usize,
    /// Entities by kind
    pub entities_by_kind: BTreeMap<String, usize>,
    /// Relationships by kind
    pub relationships_by_kind: BTreeMap<String, usize>,
    /// Relationships with no resolved target
    pub unresolved_relationships: usize,
    /// Stored vectors
    pub vectors: usize,
}

impl WorkspaceStats {
    /// Total entities across kinds.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities_by_kind.values().sum()
    }

    /// Total relationships across kinds.
    #[must_use]
    pub fn relationship_count(&self) -> usize {
        self.relationships_by_kind.values().sum()
    }

    /// Relationships of one kind.
    #[must_use]
    pub fn relationships_of(&self, kind: RelationshipKind) -> usize {
        self.relationships_by_kind
            .get(kind.as_str())
            .copied()
            .unwrap_or(0)
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

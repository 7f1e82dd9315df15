//! Language-agnostic extraction output.
//!
//! Every extractor produces an [`Extraction`]: a flat entity list (index 0 is
//! always the file entity) and relationships that refer to entities either by
//! local index or by name. Names are resolved to ids by the index writer.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::types::{
    EntityKind, EntityMetadata, Language, RelationshipKind, RelationshipProperties, TypeFlavor,
};

/// Index of the file entity inside [`Extraction::entities`].
pub const FILE_ENTITY: usize = 0;

/// An entity extracted from one file, before it has a database id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntity {
    /// Entity variant
    pub kind: EntityKind,
    /// Flavor for `Type` entities
    pub flavor: Option<TypeFlavor>,
    /// Qualified name
    pub name: String,
    /// Unqualified name
    pub simple_name: String,
    /// First line (1-indexed)
    pub start_line: u32,
    /// Last line (1-indexed)
    pub end_line: u32,
    /// Declaration without body
    pub signature: Option<String>,
    /// Language-specific data
    pub metadata: EntityMetadata,
}

/// Target of an extracted relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeTarget {
    /// Another entity of the same extraction
    Local(usize),
    /// A name to resolve within the workspace
    Named(String),
}

/// A relationship extracted from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRelationship {
    /// Edge type
    pub kind: RelationshipKind,
    /// Source entity (index into the extraction's entities)
    pub from: usize,
    /// Target entity
    pub target: EdgeTarget,
    /// Provenance
    pub properties: RelationshipProperties,
}

/// Everything extracted from one file.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Source language
    pub language: Language,
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Entities; index 0 is the file itself
    pub entities: Vec<ExtractedEntity>,
    /// Relationships between entities
    pub relationships: Vec<ExtractedRelationship>,
    seen_edges: HashSet<(usize, RelationshipKind, EdgeTarget)>,
}

impl Extraction {
    /// Start an extraction holding only the file entity.
    #[must_use]
    pub fn new(path: &Path, language: Language, line_count: u32) -> Self {
        let name = normalize_path(path);
        let simple_name = path
            .file_name()
            .map_or_else(|| name.clone(), |n| n.to_string_lossy().into_owned());
        let file = ExtractedEntity {
            kind: EntityKind::File,
            flavor: None,
            name,
            simple_name,
            start_line: 1,
            end_line: line_count.max(1),
            signature: None,
            metadata: EntityMetadata {
                line_count: Some(line_count),
                ..EntityMetadata::default()
            },
        };
        Self {
            language,
            path: path.to_path_buf(),
            entities: vec![file],
            relationships: Vec::new(),
            seen_edges: HashSet::new(),
        }
    }

    /// Add a child entity and the `Defines` edge from its parent.
    ///
    /// Returns the new entity's index.
    pub fn add_entity(&mut self, parent: usize, entity: ExtractedEntity) -> usize {
        let line = entity.start_line;
        self.entities.push(entity);
        let index = self.entities.len() - 1;
        self.push_edge(
            parent,
            RelationshipKind::Defines,
            EdgeTarget::Local(index),
            RelationshipProperties {
                line: Some(line),
                ..RelationshipProperties::default()
            },
        );
        index
    }

    /// Add an edge to a named target. Duplicate `(from, kind, target)` edges are dropped.
    pub fn add_edge(&mut self, from: usize, kind: RelationshipKind, target: &str, line: u32) {
        self.push_edge(
            from,
            kind,
            EdgeTarget::Named(target.to_string()),
            RelationshipProperties {
                line: Some(line),
                ..RelationshipProperties::default()
            },
        );
    }

    /// Add a `Calls` edge, recording the receiver text for member calls.
    pub fn add_call(
        &mut self,
        from: usize,
        method: &str,
        receiver: Option<String>,
        inferred_type: Option<String>,
        line: u32,
    ) {
        self.push_edge(
            from,
            RelationshipKind::Calls,
            EdgeTarget::Named(method.to_string()),
            RelationshipProperties {
                line: Some(line),
                receiver,
                inferred_type,
                unresolved: false,
            },
        );
    }

    /// Add one edge per user-defined type named in a type expression.
    pub fn add_type_edges(
        &mut self,
        from: usize,
        kind: RelationshipKind,
        type_text: &str,
        line: u32,
    ) {
        for name in type_names(self.language, type_text) {
            self.add_edge(from, kind, &name, line);
        }
    }

    /// Find a local type entity by simple or qualified name.
    #[must_use]
    pub fn find_type(&self, name: &str) -> Option<usize> {
        self.entities.iter().position(|e| {
            e.kind == EntityKind::Type && (e.name == name || e.simple_name == name)
        })
    }

    /// Find a local entity by qualified name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.entities.iter().position(|e| e.name == name)
    }

    /// Name an edge points at (local entity name or the unresolved name).
    #[must_use]
    pub fn target_name<'a>(&'a self, rel: &'a ExtractedRelationship) -> &'a str {
        match &rel.target {
            EdgeTarget::Local(i) => self.entities.get(*i).map_or("", |e| e.name.as_str()),
            EdgeTarget::Named(name) => name,
        }
    }

    /// Relationships of one kind.
    pub fn relationships_of(
        &self,
        kind: RelationshipKind,
    ) -> impl Iterator<Item = &ExtractedRelationship> {
        self.relationships.iter().filter(move |r| r.kind == kind)
    }

    fn push_edge(
        &mut self,
        from: usize,
        kind: RelationshipKind,
        target: EdgeTarget,
        properties: RelationshipProperties,
    ) {
        if let EdgeTarget::Named(name) = &target {
            if name.is_empty() {
                return;
            }
        }
        if self.seen_edges.insert((from, kind, target.clone())) {
            self.relationships.push(ExtractedRelationship {
                kind,
                from,
                target,
                properties,
            });
        }
    }
}

/// Normalize a path to forward slashes for consistent storage.
#[must_use]
pub fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if cfg!(windows) {
        s.replace('\\', "/")
    } else {
        s.into_owned()
    }
}

/// User-defined type names mentioned in a type expression.
///
/// `Option<Vec<Order>>` yields `Order`; `Dictionary<string, Customer>` yields
/// `Customer`. Path-qualified names keep only their last segment.
#[must_use]
pub fn type_names(language: Language, type_text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let is_name_char =
        |c: char| c.is_alphanumeric() || c == '_' || c == '.' || c == ':' || c == '\'';
    for token in type_text.split(|c: char| !is_name_char(c)) {
        let token = token.trim_matches(|c| c == ':' || c == '.');
        if token.is_empty() || token.starts_with('\'') {
            continue;
        }
        let last = token
            .rsplit(|c| c == ':' || c == '.')
            .next()
            .unwrap_or(token);
        if last.is_empty()
            || last.chars().next().is_some_and(|c| c.is_ascii_digit())
            || is_builtin_type(language, last)
            || matches!(last, "dyn" | "impl" | "mut" | "const" | "ref" | "out" | "in" | "params")
        {
            continue;
        }
        if !names.iter().any(|n| n == last) {
            names.push(last.to_string());
        }
    }
    names
}

/// Returns `true` for primitive and standard-library types that never get an entity.
#[must_use]
pub fn is_builtin_type(language: Language, name: &str) -> bool {
    match language {
        Language::Rust => matches!(
            name,
            "i8" | "i16" | "i32" | "i64" | "i128" | "isize"
                | "u8" | "u16" | "u32" | "u64" | "u128" | "usize"
                | "f32" | "f64" | "bool" | "char" | "str" | "String" | "Self" | "self"
                | "Option" | "Result" | "Vec" | "Box" | "Rc" | "Arc" | "HashMap" | "HashSet"
                | "BTreeMap" | "BTreeSet" | "VecDeque" | "Cow" | "RefCell" | "Cell" | "Mutex"
                | "RwLock" | "Path" | "PathBuf" | "std" | "crate" | "super"
        ),
        Language::CSharp => matches!(
            name,
            "int" | "uint" | "long" | "ulong" | "short" | "ushort" | "byte" | "sbyte"
                | "float" | "double" | "decimal" | "bool" | "char" | "string" | "object"
                | "void" | "var" | "dynamic" | "nint" | "nuint"
                | "String" | "Object" | "Int32" | "Int64" | "Boolean" | "Task" | "ValueTask"
                | "List" | "IList" | "IEnumerable" | "ICollection" | "IReadOnlyList"
                | "IReadOnlyCollection" | "Dictionary" | "IDictionary" | "HashSet" | "Func"
                | "Action" | "Nullable" | "DateTime" | "TimeSpan" | "Guid" | "CancellationToken"
                | "System" | "global"
        ),
        Language::Python => matches!(
            name,
            "int" | "float" | "str" | "bool" | "bytes" | "None" | "object" | "list" | "dict"
                | "set" | "tuple" | "frozenset" | "type" | "complex"
                | "Any" | "Optional" | "Union" | "List" | "Dict" | "Set" | "Tuple" | "Callable"
                | "Iterable" | "Iterator" | "Sequence" | "Mapping" | "Generator" | "Awaitable"
                | "typing" | "self" | "cls"
        ),
    }
}

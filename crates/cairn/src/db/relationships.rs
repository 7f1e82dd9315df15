//! Relationship storage: name resolution, relinking, and edge lookups.
//!
//! Targets are resolved by name inside one namespace only. The lookup order is
//! the receiver-qualified name (`Type.member`) when the receiver type is known,
//! then the exact name, then the last path segment when that is unambiguous.
//! A member call on a receiver of unknown type is never matched by bare name.
//!
//! Relinking runs inside each file's write transaction. It touches two sets
//! of edges owned by other files: edges that pointed into the rewritten file,
//! and unresolved edges whose last target segment (`target_simple`) is a name
//! the file defined before or defines now. Both sets are bounded by the file
//! being written, never by the size of the namespace.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::{Connection, OptionalExtension, params};

use super::helpers::{
    RELATIONSHIP_COLUMNS, parse_language, parse_relationship_kind, row_to_relationship,
};
use super::{Index, context_error};
use crate::error::{Error, Result};
use crate::types::{EntityId, RelationshipKind, RelationshipProperties};

/// Columns loaded for an edge being re-resolved; `f` is the owning file.
const PENDING_COLUMNS: &str =
    "r.id, r.kind, r.target_name, r.file_path, r.properties, f.language";

/// What to look up when resolving one relationship target.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TargetQuery<'a> {
    pub kind: RelationshipKind,
    pub name: &'a str,
    /// Owning file; matches there win ties
    pub file_path: &'a str,
    /// Member separator of the owning file's language
    pub separator: &'a str,
    pub properties: &'a RelationshipProperties,
}

/// Entity kinds a relationship kind may point at, most preferred first,
/// as a `|`-delimited list matched with `instr`.
///
/// Calls may land on a type: `Order()` in Python constructs an `Order`.
fn target_entity_kinds(kind: RelationshipKind) -> &'static str {
    match kind {
        RelationshipKind::Calls => "|method|type|",
        RelationshipKind::HasAttribute => "|type|",
        k if k.targets_type() => "|type|",
        _ => "|type|method|property|",
    }
}

/// `std::collections::HashMap` → `HashMap`, `System.Text` → `Text`.
pub(crate) fn last_segment(name: &str) -> &str {
    let tail = name.rsplit("::").next().unwrap_or(name);
    tail.rsplit('.').next().unwrap_or(tail)
}

/// Resolve a target name to an entity id of the same namespace.
pub(crate) fn resolve_target(
    conn: &Connection,
    namespace: &str,
    query: &TargetQuery<'_>,
) -> rusqlite::Result<Option<i64>> {
    let entity_kinds = target_entity_kinds(query.kind);

    let mut candidates = Vec::with_capacity(3);
    if let Some(owner) = query.properties.inferred_type.as_deref() {
        candidates.push(format!("{owner}{}{}", query.separator, query.name));
    }
    candidates.push(query.name.to_string());
    if query.kind == RelationshipKind::HasAttribute {
        candidates.push(format!("{}Attribute", query.name));
    }

    let mut exact = conn.prepare_cached(
        "SELECT id FROM entities
         WHERE namespace = ?1 AND name = ?2 AND instr(?3, '|' || kind || '|') > 0
         ORDER BY (file_path = ?4) DESC, instr(?3, '|' || kind || '|'), id
         LIMIT 1",
    )?;
    for candidate in &candidates {
        let found = exact
            .query_row(
                params![namespace, candidate, entity_kinds, query.file_path],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if found.is_some() {
            return Ok(found);
        }
    }

    if query.properties.receiver.is_some() && query.properties.inferred_type.is_none() {
        return Ok(None);
    }

    let simple = last_segment(query.name);
    if simple.is_empty() || simple == "*" {
        return Ok(None);
    }
    let mut by_simple = conn.prepare_cached(
        "SELECT id, file_path = ?4 FROM entities
         WHERE namespace = ?1 AND simple_name = ?2 AND instr(?3, '|' || kind || '|') > 0
         ORDER BY (file_path = ?4) DESC, instr(?3, '|' || kind || '|'), id
         LIMIT 2",
    )?;
    let matches = by_simple
        .query_map(params![namespace, simple, entity_kinds, query.file_path], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(match matches.as_slice() {
        [(id, true), ..] | [(id, false)] => Some(*id),
        _ => None,
    })
}

/// Serialize relationship properties for storage.
pub(crate) fn properties_json(properties: &RelationshipProperties) -> Result<String> {
    serde_json::to_string(properties)
        .map_err(|e| Error::Internal(format!("failed to encode relationship properties: {e}")))
}

/// An edge owned by another file whose target is looked up again.
pub(crate) struct PendingEdge {
    id: i64,
    kind: RelationshipKind,
    target_name: String,
    file_path: String,
    properties: RelationshipProperties,
    separator: &'static str,
}

/// Edges of other files that currently point into `file_path`.
///
/// Must run before the file's entities are deleted: afterwards the cascade
/// has already cleared `to_entity`.
pub(crate) fn inbound_edges(
    conn: &Connection,
    namespace: &str,
    file_path: &str,
) -> Result<BTreeMap<i64, PendingEdge>> {
    load_pending(
        conn,
        &format!(
            "SELECT {PENDING_COLUMNS}
             FROM relationships r
             JOIN entities e ON e.id = r.to_entity
             LEFT JOIN files f ON f.namespace = r.namespace AND f.path = r.file_path
             WHERE e.namespace = ?1 AND e.file_path = ?2 AND r.file_path <> ?2"
        ),
        namespace,
        file_path,
    )
}

/// Simple names defined by one file, plus the bare form of `*Attribute`
/// names so `[Serializable]` finds `SerializableAttribute`.
pub(crate) fn defined_names(
    conn: &Connection,
    namespace: &str,
    file_path: &str,
) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT DISTINCT simple_name FROM entities WHERE namespace = ?1 AND file_path = ?2",
    )?;
    let mut names = BTreeSet::new();
    for name in stmt.query_map(params![namespace, file_path], |row| row.get::<_, String>(0))? {
        let name = name?;
        if let Some(bare) = name.strip_suffix("Attribute").filter(|b| !b.is_empty()) {
            names.insert(bare.to_string());
        }
        names.insert(name);
    }
    Ok(names)
}

/// Re-resolve `inbound` plus every unresolved edge of another file whose
/// `target_simple` is one of `names`.
///
/// Returns the number of edges that now have a target.
pub(crate) fn relink(
    conn: &Connection,
    namespace: &str,
    file_path: &str,
    mut pending: BTreeMap<i64, PendingEdge>,
    names: &BTreeSet<String>,
) -> Result<usize> {
    let unresolved_sql = format!(
        "SELECT {PENDING_COLUMNS}
         FROM relationships r
         LEFT JOIN files f ON f.namespace = r.namespace AND f.path = r.file_path
         WHERE r.namespace = ?1 AND r.to_entity IS NULL
           AND r.target_simple = ?2 AND r.file_path <> ?3"
    );
    for name in names {
        let mut stmt = conn.prepare_cached(&unresolved_sql)?;
        let rows = stmt.query_map(params![namespace, name, file_path], pending_row)?;
        for row in rows {
            let edge = decode_pending(row?)?;
            pending.entry(edge.id).or_insert(edge);
        }
    }

    let mut update = conn.prepare_cached("UPDATE relationships SET to_entity = ?1 WHERE id = ?2")?;
    let mut linked = 0;
    for edge in pending.values() {
        let query = TargetQuery {
            kind: edge.kind,
            name: &edge.target_name,
            file_path: &edge.file_path,
            separator: edge.separator,
            properties: &edge.properties,
        };
        if let Some(target) = resolve_target(conn, namespace, &query)? {
            update
                .execute(params![target, edge.id])
                .map_err(|e| context_error(e, namespace))?;
            linked += 1;
        }
    }

    tracing::trace!(
        namespace,
        file = file_path,
        pending = pending.len(),
        linked,
        "Relinked edges"
    );
    Ok(linked)
}

type PendingRow = (i64, String, String, String, String, Option<String>);

fn pending_row(row: &rusqlite::Row) -> rusqlite::Result<PendingRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_pending(
    (id, kind, target_name, file_path, properties, language): PendingRow,
) -> Result<PendingEdge> {
    let separator = language
        .as_deref()
        .map(parse_language)
        .transpose()?
        .map_or(".", |l| l.member_separator());
    Ok(PendingEdge {
        id,
        kind: parse_relationship_kind(&kind)?,
        target_name,
        file_path,
        properties: serde_json::from_str(&properties).unwrap_or_default(),
        separator,
    })
}

fn load_pending(
    conn: &Connection,
    sql: &str,
    namespace: &str,
    file_path: &str,
) -> Result<BTreeMap<i64, PendingEdge>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params![namespace, file_path], pending_row)?;
    let mut pending = BTreeMap::new();
    for row in rows {
        let edge = decode_pending(row?)?;
        pending.insert(edge.id, edge);
    }
    Ok(pending)
}

impl Index {
    /// Relationships whose source is the given entity.
    pub fn relationships_from(&self, id: EntityId) -> Result<Vec<crate::types::Relationship>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM relationships r
             WHERE r.from_entity = ?1 ORDER BY r.id"
        ))?;
        let rels = stmt
            .query_map([id.as_i64()], row_to_relationship)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rels)
    }
}

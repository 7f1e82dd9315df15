//! Helper functions for database row conversion and parsing.
//!
//! These utilities convert between database representations and domain types.
//! Also provides SQL column list constants to reduce duplication across query modules.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::types::{
    Entity, EntityId, EntityKind, EntityMetadata, FileRecord, Language, Relationship,
    RelationshipKind, RelationshipProperties, TypeFlavor, WorkspaceContext,
};

/// SQL column list for the entities table, aliased as `e`.
///
/// Use with `row_to_entity` for consistent column ordering.
pub(crate) const ENTITY_COLUMNS: &str = "e.id, e.namespace, e.file_path, e.kind, e.flavor, e.name, \
     e.simple_name, e.start_line, e.end_line, e.signature, e.metadata";

/// Number of columns in [`ENTITY_COLUMNS`]; extra selected columns start here.
pub(crate) const ENTITY_COLUMN_COUNT: usize = 11;

/// SQL column list for the relationships table, aliased as `r`.
///
/// Use with `row_to_relationship` for consistent column ordering.
pub(crate) const RELATIONSHIP_COLUMNS: &str =
    "r.id, r.kind, r.from_entity, r.to_entity, r.target_name, r.namespace, r.file_path, r.properties";

/// SQL column list for the files table.
///
/// Use with `row_to_file_record` for consistent column ordering.
pub(crate) const FILE_COLUMNS: &str =
    "path, namespace, language, last_indexed_at, indexed_at, size_bytes, content_hash";

/// SQL column list for the workspaces table.
pub(crate) const WORKSPACE_COLUMNS: &str = "name, root_path, storage_namespace, registered_at";

/// Comma-separated, quoted list of dependency kinds for `IN (...)` clauses.
pub(crate) fn dependency_kinds_sql() -> String {
    RelationshipKind::DEPENDENCY
        .iter()
        .map(|k| format!("'{}'", k.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the error reported for an unrecognized stored value.
fn corrupt(column: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!(
            "Unknown {what} '{value}' in database. \
             Database may be corrupted or from a newer version."
        )
        .into(),
    )
}

/// Parse a language string from the database.
pub(crate) fn parse_language(s: &str) -> rusqlite::Result<Language> {
    Language::ALL
        .into_iter()
        .find(|l| l.as_str() == s)
        .ok_or_else(|| corrupt(0, "language", s))
}

/// Parse an entity kind string from the database.
pub(crate) fn parse_entity_kind(s: &str) -> rusqlite::Result<EntityKind> {
    match s {
        "file" => Ok(EntityKind::File),
        "type" => Ok(EntityKind::Type),
        "method" => Ok(EntityKind::Method),
        "property" => Ok(EntityKind::Property),
        unknown => Err(corrupt(3, "entity kind", unknown)),
    }
}

/// Parse a type flavor string from the database.
pub(crate) fn parse_flavor(s: &str) -> rusqlite::Result<TypeFlavor> {
    match s {
        "class" => Ok(TypeFlavor::Class),
        "struct" => Ok(TypeFlavor::Struct),
        "interface" => Ok(TypeFlavor::Interface),
        "trait" => Ok(TypeFlavor::Trait),
        "enum" => Ok(TypeFlavor::Enum),
        "record" => Ok(TypeFlavor::Record),
        "module" => Ok(TypeFlavor::Module),
        unknown => Err(corrupt(4, "type flavor", unknown)),
    }
}

/// Parse a relationship kind string from the database.
pub(crate) fn parse_relationship_kind(s: &str) -> rusqlite::Result<RelationshipKind> {
    RelationshipKind::parse(s).ok_or_else(|| corrupt(1, "relationship kind", s))
}

/// Decode a JSON column, mapping failures to a conversion error.
fn parse_json<T: serde::de::DeserializeOwned>(column: usize, s: &str) -> rusqlite::Result<T> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Convert a database row to an [`Entity`].
///
/// Expects the columns of [`ENTITY_COLUMNS`] first.
pub(crate) fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<Entity> {
    let flavor: Option<String> = row.get(4)?;
    let metadata: String = row.get(10)?;
    Ok(Entity {
        id: EntityId::from(row.get::<_, i64>(0)?),
        namespace: row.get(1)?,
        file_path: PathBuf::from(row.get::<_, String>(2)?),
        kind: parse_entity_kind(&row.get::<_, String>(3)?)?,
        flavor: flavor.as_deref().map(parse_flavor).transpose()?,
        name: row.get(5)?,
        simple_name: row.get(6)?,
        start_line: row.get(7)?,
        end_line: row.get(8)?,
        signature: row.get(9)?,
        metadata: parse_json::<EntityMetadata>(10, &metadata)?,
    })
}

/// Convert a database row to a [`Relationship`].
///
/// `properties.unresolved` always reflects whether `to_entity` is set: a
/// target deleted by another file's re-extraction nulls the column first.
pub(crate) fn row_to_relationship(row: &rusqlite::Row) -> rusqlite::Result<Relationship> {
    let to_entity = row.get::<_, Option<i64>>(3)?.map(EntityId::from);
    let properties: String = row.get(7)?;
    let mut properties: RelationshipProperties = parse_json(7, &properties)?;
    properties.unresolved = to_entity.is_none();
    Ok(Relationship {
        id: row.get(0)?,
        kind: parse_relationship_kind(&row.get::<_, String>(1)?)?,
        from_entity: EntityId::from(row.get::<_, i64>(2)?),
        to_entity,
        target_name: row.get(4)?,
        namespace: row.get(5)?,
        file_path: PathBuf::from(row.get::<_, String>(6)?),
        properties,
    })
}

/// Convert a database row to a [`FileRecord`].
///
/// Expected columns: [`FILE_COLUMNS`].
// Sizes and hashes round-trip through SQLite's signed INTEGER
#[allow(clippy::cast_sign_loss)]
pub(crate) fn row_to_file_record(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        path: PathBuf::from(row.get::<_, String>(0)?),
        namespace: row.get(1)?,
        language: parse_language(&row.get::<_, String>(2)?)?,
        last_indexed_at: row.get(3)?,
        indexed_at: row.get(4)?,
        size_bytes: row.get::<_, i64>(5)? as u64,
        content_hash: row.get::<_, Option<i64>>(6)?.map(|h| h as u64),
    })
}

/// Convert a database row to a [`WorkspaceContext`].
///
/// Expected columns: [`WORKSPACE_COLUMNS`].
pub(crate) fn row_to_workspace(row: &rusqlite::Row) -> rusqlite::Result<WorkspaceContext> {
    let registered_at: String = row.get(3)?;
    let registered_at = DateTime::parse_from_rfc3339(&registered_at)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);
    Ok(WorkspaceContext {
        name: row.get(0)?,
        root_path: PathBuf::from(row.get::<_, String>(1)?),
        storage_namespace: row.get(2)?,
        registered_at,
    })
}

/// Encode an embedding as little-endian `f32` bytes.
pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode an embedding stored by [`encode_vector`].
pub(crate) fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Escape `%`, `_`, and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

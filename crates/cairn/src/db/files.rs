//! File records and the atomic per-file write.

use std::path::Path;

use rusqlite::{OptionalExtension, params};

use super::helpers::{FILE_COLUMNS, row_to_file_record};
use super::relationships::{
    TargetQuery, defined_names, inbound_edges, last_segment, properties_json, relink,
    resolve_target,
};
use super::{Index, context_error};
use crate::error::{Error, Result};
use crate::languages::common::normalize_path;
use crate::languages::{EdgeTarget, Extraction};
use crate::store::{FileWrite, RemovedFile, WrittenFile};
use crate::types::{EntityId, FileRecord};

impl Index {
    /// All file records of a namespace, ordered by path.
    pub fn file_records(&self, namespace: &str) -> Result<Vec<FileRecord>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE namespace = ?1 ORDER BY path"
        ))?;
        let records = stmt
            .query_map([namespace], row_to_file_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Get one file record.
    pub fn get_file_record(&self, namespace: &str, path: &Path) -> Result<Option<FileRecord>> {
        let conn = self.reader()?;
        conn.query_row(
            &format!("SELECT {FILE_COLUMNS} FROM files WHERE namespace = ?1 AND path = ?2"),
            params![namespace, normalize_path(path)],
            row_to_file_record,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Atomically replace one file's graph data in a transaction.
    ///
    /// Steps, in order: remember other files' edges into this file, delete
    /// the file's previous entities (owned edges and vectors cascade), insert
    /// the new entities, insert the new relationships resolving named targets
    /// within the namespace, relink other files' edges against the names the
    /// file defined before or defines now, upsert the file record. Readers
    /// never observe the window in which inbound edges are unresolved.
    ///
    /// An edge whose endpoints land in two namespaces fails the isolation
    /// trigger and aborts the whole file with [`Error::ContextMismatch`]; the
    /// previous rows stay in place. Resolution only searches `namespace`, so
    /// this is reachable only through a corrupted database.
    ///
    /// Returns the generated `EntityId` for each extracted entity, in the same
    /// order as `extraction.entities`, and the number of relinked edges.
    // Sizes and hashes round-trip through SQLite's signed INTEGER
    #[allow(clippy::cast_possible_wrap)]
    pub fn write_file_atomic(
        &self,
        namespace: &str,
        file: &FileWrite<'_>,
        extraction: &Extraction,
    ) -> Result<WrittenFile> {
        let path_str = normalize_path(file.path);
        let indexed_at = Self::now_ns()?;
        let separator = file.language.member_separator();

        let mut conn = self.writer()?;
        let tx = conn.transaction()?;

        let inbound = inbound_edges(&tx, namespace, &path_str)?;
        let mut names = defined_names(&tx, namespace, &path_str)?;
        let removed = tx.execute(
            "DELETE FROM entities WHERE namespace = ?1 AND file_path = ?2",
            params![namespace, path_str],
        )?;

        let mut ids = Vec::with_capacity(extraction.entities.len());
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO entities
                 (namespace, file_path, kind, flavor, name, simple_name,
                  start_line, end_line, signature, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for entity in &extraction.entities {
                let metadata = serde_json::to_string(&entity.metadata).map_err(|e| {
                    Error::Internal(format!("failed to encode entity metadata: {e}"))
                })?;
                insert.execute(params![
                    namespace,
                    path_str,
                    entity.kind.as_str(),
                    entity.flavor.map(|f| f.as_str()),
                    entity.name,
                    entity.simple_name,
                    entity.start_line,
                    entity.end_line,
                    entity.signature,
                    metadata,
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }

        let local = |index: usize| {
            ids.get(index).copied().ok_or_else(|| {
                Error::Internal(format!(
                    "relationship refers to entity {index} but {} has {} entities",
                    path_str,
                    ids.len()
                ))
            })
        };

        let mut unresolved = 0usize;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO relationships
                 (namespace, file_path, kind, from_entity, to_entity,
                  target_name, target_simple, properties)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for rel in &extraction.relationships {
                let from = local(rel.from)?;
                let target_name = extraction.target_name(rel);
                let to = match &rel.target {
                    EdgeTarget::Local(index) => Some(local(*index)?),
                    EdgeTarget::Named(name) => resolve_target(
                        &tx,
                        namespace,
                        &TargetQuery {
                            kind: rel.kind,
                            name,
                            file_path: &path_str,
                            separator,
                            properties: &rel.properties,
                        },
                    )?,
                };
                let mut properties = rel.properties.clone();
                properties.unresolved = to.is_none();
                unresolved += usize::from(to.is_none());

                insert
                    .execute(params![
                        namespace,
                        path_str,
                        rel.kind.as_str(),
                        from,
                        to,
                        target_name,
                        last_segment(target_name),
                        properties_json(&properties)?,
                    ])
                    .map_err(|e| context_error(e, namespace))?;
            }
        }

        names.extend(defined_names(&tx, namespace, &path_str)?);
        let relinked = relink(&tx, namespace, &path_str, inbound, &names)?;

        tx.execute(
            "INSERT INTO files
             (namespace, path, language, last_indexed_at, indexed_at, size_bytes, content_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(namespace, path) DO UPDATE SET
                 language = excluded.language,
                 last_indexed_at = excluded.last_indexed_at,
                 indexed_at = excluded.indexed_at,
                 size_bytes = excluded.size_bytes,
                 content_hash = excluded.content_hash",
            params![
                namespace,
                path_str,
                file.language.as_str(),
                file.watermark,
                indexed_at,
                file.size_bytes as i64,
                file.content_hash.map(|h| h as i64),
            ],
        )?;

        tx.commit()?;

        tracing::trace!(
            namespace,
            path = %path_str,
            removed,
            entities = ids.len(),
            relationships = extraction.relationships.len(),
            unresolved,
            relinked,
            "Wrote file"
        );

        Ok(WrittenFile {
            entity_ids: ids.into_iter().map(EntityId::from).collect(),
            relinked,
        })
    }

    /// Delete one file's entities (cascading owned edges and vectors) and its record.
    ///
    /// Other files' edges into the file are re-resolved in the same
    /// transaction; most become unresolved, some find another definition.
    pub fn remove_file_atomic(&self, namespace: &str, path: &Path) -> Result<RemovedFile> {
        let path_str = normalize_path(path);
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        let inbound = inbound_edges(&tx, namespace, &path_str)?;
        let names = defined_names(&tx, namespace, &path_str)?;
        let removed = tx.execute(
            "DELETE FROM entities WHERE namespace = ?1 AND file_path = ?2",
            params![namespace, path_str],
        )?;
        tx.execute(
            "DELETE FROM files WHERE namespace = ?1 AND path = ?2",
            params![namespace, path_str],
        )?;
        let relinked = relink(&tx, namespace, &path_str, inbound, &names)?;
        tx.commit()?;

        tracing::trace!(namespace, path = %path_str, removed, relinked, "Removed file");
        Ok(RemovedFile {
            entities: removed,
            relinked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::temp_index;
    use crate::languages::extract;
    use crate::types::{Language, RelationshipKind};

    const NS: &str = "ws_demo_12345678";

    fn write(index: &Index, path: &str, code: &str, watermark: i64) -> Vec<EntityId> {
        let path = Path::new(path);
        let extraction = extract(code, path, Language::Python).expect("parse");
        let file = FileWrite {
            path,
            language: Language::Python,
            watermark,
            size_bytes: code.len() as u64,
            content_hash: Some(42),
        };
        index.write_file_atomic(NS, &file, &extraction).expect("write").entity_ids
    }

    fn inherits_edge(index: &Index, from: EntityId) -> crate::types::Relationship {
        index
            .relationships_from(from)
            .expect("rels")
            .into_iter()
            .find(|r| r.kind == RelationshipKind::Inherits)
            .expect("inherits edge")
    }

    #[test]
    fn write_records_watermark_and_entities() {
        let (_dir, index) = temp_index();
        let ids = write(&index, "a.py", "class A:\n    pass\n", 100);
        assert_eq!(ids.len(), 2);

        let record = index
            .get_file_record(NS, Path::new("a.py"))
            .expect("get")
            .expect("present");
        assert_eq!(record.last_indexed_at, 100);
        assert_eq!(record.language, Language::Python);
        assert_eq!(record.content_hash, Some(42));
        assert!(record.indexed_at > 0);
    }

    #[test]
    fn rewrite_replaces_previous_entities() {
        let (_dir, index) = temp_index();
        let first = write(&index, "a.py", "class A:\n    pass\n", 1);
        let second = write(&index, "a.py", "class B:\n    pass\n", 2);

        assert!(index.get_entity(first[1]).expect("get").is_none());
        let names: Vec<String> = index
            .list_entities(NS, Path::new("a.py"))
            .expect("list")
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.py", "B"]);
        let stored: Vec<EntityId> = index
            .list_entities(NS, Path::new("a.py"))
            .expect("list")
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(stored, second);
        assert_eq!(index.file_records(NS).expect("records").len(), 1);
    }

    #[test]
    fn named_targets_resolve_across_files() {
        let (_dir, index) = temp_index();
        let base = write(&index, "base.py", "class Base:\n    pass\n", 1);
        let child = write(&index, "child.py", "class Child(Base):\n    pass\n", 1);

        let inherits: Vec<_> = index
            .relationships_from(child[1])
            .expect("rels")
            .into_iter()
            .filter(|r| r.kind == RelationshipKind::Inherits)
            .collect();
        assert_eq!(inherits.len(), 1);
        assert_eq!(inherits[0].to_entity, Some(base[1]));
        assert!(!inherits[0].properties.unresolved);
    }

    #[test]
    fn removing_a_target_unresolves_and_rewriting_it_relinks() {
        let (_dir, index) = temp_index();
        write(&index, "base.py", "class Base:\n    pass\n", 1);
        let child = write(&index, "child.py", "class Child(Base):\n    pass\n", 1);

        let removed = index.remove_file_atomic(NS, Path::new("base.py")).expect("remove");
        assert_eq!(removed.entities, 2);
        assert_eq!(removed.relinked, 0);
        let rel = inherits_edge(&index, child[1]);
        assert_eq!(rel.to_entity, None);
        assert!(rel.properties.unresolved);
        assert_eq!(rel.target_name, "Base");

        let extraction = extract("class Base:\n    pass\n", Path::new("base.py"), Language::Python)
            .expect("parse");
        let file = FileWrite {
            path: Path::new("base.py"),
            language: Language::Python,
            watermark: 2,
            size_bytes: 22,
            content_hash: None,
        };
        let written = index.write_file_atomic(NS, &file, &extraction).expect("write");
        assert_eq!(written.relinked, 1);
        assert_eq!(inherits_edge(&index, child[1]).to_entity, Some(written.entity_ids[1]));
    }

    #[test]
    fn rewriting_a_target_keeps_inbound_edges_resolved() {
        let (_dir, index) = temp_index();
        write(&index, "a.py", "class Foo:\n    pass\n", 1);
        let b = write(&index, "b.py", "class Baz(Foo):\n    pass\n", 1);
        let before = inherits_edge(&index, b[1]);

        let a = write(&index, "a.py", "class Foo:\n    x = 1\n", 2);

        let after = inherits_edge(&index, b[1]);
        assert_eq!(after.id, before.id);
        assert_eq!(after.to_entity, Some(a[1]));
        assert!(!after.properties.unresolved);
        assert_eq!(index.stats("demo", NS).expect("stats").unresolved_relationships, 0);
    }

    #[test]
    fn defining_a_name_links_earlier_unresolved_edges() {
        let (_dir, index) = temp_index();
        let child = write(&index, "child.py", "class Child(Late):\n    pass\n", 1);
        write(&index, "other.py", "class Other(Missing):\n    pass\n", 1);
        assert_eq!(inherits_edge(&index, child[1]).to_entity, None);

        let late = write(&index, "late.py", "class Late:\n    pass\n", 1);

        assert_eq!(inherits_edge(&index, child[1]).to_entity, Some(late[1]));
        assert_eq!(index.stats("demo", NS).expect("stats").unresolved_relationships, 1);
    }

    #[test]
    fn renaming_a_target_unresolves_inbound_edges() {
        let (_dir, index) = temp_index();
        write(&index, "a.py", "class Foo:\n    pass\n", 1);
        let b = write(&index, "b.py", "class Baz(Foo):\n    pass\n", 1);

        write(&index, "a.py", "class Renamed:\n    pass\n", 2);

        let rel = inherits_edge(&index, b[1]);
        assert_eq!(rel.to_entity, None);
        assert!(rel.properties.unresolved);
    }

    #[test]
    fn remove_file_deletes_record_and_owned_edges() {
        let (_dir, index) = temp_index();
        let ids = write(&index, "a.py", "class A:\n    def f(self):\n        g()\n", 1);

        index.remove_file_atomic(NS, Path::new("a.py")).expect("remove");

        assert!(index.get_file_record(NS, Path::new("a.py")).expect("get").is_none());
        for id in ids {
            assert!(index.relationships_from(id).expect("rels").is_empty());
        }
        let stats = index.stats("demo", NS).expect("stats");
        assert_eq!(stats.relationship_count(), 0);
        assert_eq!(stats.entity_count(), 0);
    }
}

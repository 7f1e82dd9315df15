//! Entity lookups.

use std::path::Path;

use rusqlite::{OptionalExtension, params};

use super::helpers::escape_like;
use super::{ENTITY_COLUMNS, Index, row_to_entity};
use crate::error::Result;
use crate::languages::common::normalize_path;
use crate::types::{Entity, EntityId};

impl Index {
    /// Get an entity by its database ID.
    pub fn get_entity(&self, id: EntityId) -> Result<Option<Entity>> {
        let conn = self.reader()?;
        conn.query_row(
            &format!("SELECT {ENTITY_COLUMNS} FROM entities e WHERE e.id = ?1"),
            [id.as_i64()],
            row_to_entity,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Get several entities, preserving the order of `ids` and skipping missing ones.
    pub fn get_entities(&self, ids: &[EntityId]) -> Result<Vec<Entity>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities e WHERE e.id = ?1"
        ))?;
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = stmt.query_row([id.as_i64()], row_to_entity).optional()? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Entities of one file, in source order.
    pub fn list_entities(&self, namespace: &str, path: &Path) -> Result<Vec<Entity>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities e
             WHERE e.namespace = ?1 AND e.file_path = ?2
             ORDER BY e.start_line, e.id"
        ))?;
        let entities = stmt
            .query_map(params![namespace, normalize_path(path)], row_to_entity)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entities)
    }

    /// Entities matching a name, optionally restricted to one namespace.
    ///
    /// Matches the qualified name exactly, the simple name, or a qualified name
    /// ending in `.name` or `::name`. Results are ordered by namespace, then name.
    pub fn find_entities(&self, name: &str, namespace: Option<&str>) -> Result<Vec<Entity>> {
        let escaped = escape_like(name);
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities e
             WHERE (?2 IS NULL OR e.namespace = ?2)
               AND (e.name = ?1
                    OR e.simple_name = ?1
                    OR e.name LIKE '%.' || ?3 ESCAPE '\\'
                    OR e.name LIKE '%::' || ?3 ESCAPE '\\')
             ORDER BY e.namespace, e.name, e.id"
        ))?;
        let entities = stmt
            .query_map(params![name, namespace, escaped], row_to_entity)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::temp_index;
    use crate::languages::extract;
    use crate::store::FileWrite;
    use crate::types::{EntityKind, Language};

    const NS: &str = "ws_demo_12345678";

    fn write(index: &Index, namespace: &str, path: &str, code: &str) -> Vec<EntityId> {
        let path = Path::new(path);
        let extraction = extract(code, path, Language::Python).expect("parse");
        let file = FileWrite {
            path,
            language: Language::Python,
            watermark: 1,
            size_bytes: code.len() as u64,
            content_hash: None,
        };
        index.write_file_atomic(namespace, &file, &extraction).expect("write").entity_ids
    }

    #[test]
    fn list_entities_returns_source_order() {
        let (_dir, index) = temp_index();
        write(&index, NS, "svc.py", "class Svc:\n    def run(self):\n        pass\n");

        let entities = index.list_entities(NS, Path::new("svc.py")).expect("list");
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["svc.py", "Svc", "Svc.run"]);
        assert_eq!(entities[0].kind, EntityKind::File);
    }

    #[test]
    fn find_entities_matches_simple_and_qualified_names() {
        let (_dir, index) = temp_index();
        write(&index, NS, "svc.py", "class Svc:\n    def run_all(self):\n        pass\n");

        assert_eq!(index.find_entities("Svc.run_all", Some(NS)).expect("find").len(), 1);
        assert_eq!(index.find_entities("run_all", Some(NS)).expect("find").len(), 1);
        // `_` is literal, not a wildcard
        assert!(index.find_entities("runXall", Some(NS)).expect("find").is_empty());
    }

    #[test]
    fn find_entities_respects_namespace() {
        let (_dir, index) = temp_index();
        write(&index, "ws_a_00000001", "u.py", "class Util:\n    pass\n");
        write(&index, "ws_b_00000002", "u.py", "class Util:\n    pass\n");

        assert_eq!(index.find_entities("Util", None).expect("find").len(), 2);
        let scoped = index.find_entities("Util", Some("ws_a_00000001")).expect("find");
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].namespace, "ws_a_00000001");
    }

    #[test]
    fn get_entities_skips_missing_ids() {
        let (_dir, index) = temp_index();
        let ids = write(&index, NS, "a.py", "def f():\n    pass\n");

        let found = index
            .get_entities(&[ids[1], EntityId(9_999), ids[0]])
            .expect("get");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, ids[1]);
        assert_eq!(found[1].id, ids[0]);
    }
}

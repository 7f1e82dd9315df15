//! Embedding storage and similarity search.
//!
//! Search is an exact scan over one namespace's vectors. Vectors from other
//! namespaces are never loaded.

use rusqlite::params;

use super::helpers::{decode_vector, encode_vector};
use super::{Index, context_error};
use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::types::EntityId;

impl Index {
    /// Insert or replace embeddings for several entities in one transaction.
    pub fn upsert_vectors(
        &self,
        namespace: &str,
        model: &str,
        items: &[(EntityId, Vec<f32>)],
    ) -> Result<()> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO vectors (entity_id, namespace, model, dimensions, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(entity_id) DO UPDATE SET
                     namespace = excluded.namespace,
                     model = excluded.model,
                     dimensions = excluded.dimensions,
                     embedding = excluded.embedding",
            )?;
            for (id, vector) in items {
                stmt.execute(params![
                    id.as_i64(),
                    namespace,
                    model,
                    vector.len(),
                    encode_vector(vector),
                ])
                .map_err(|e| context_error(e, namespace))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Score every vector of a namespace against `query` and keep the best.
    pub fn search_vectors(
        &self,
        namespace: &str,
        query: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<(EntityId, f32)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let conn = self.reader()?;
        let mut stmt = conn.prepare_cached(
            "SELECT entity_id, embedding FROM vectors WHERE namespace = ?1 AND dimensions = ?2",
        )?;
        let rows = stmt.query_map(params![namespace, query.len()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, bytes) = row?;
            let score = cosine_similarity(query, &decode_vector(&bytes));
            if score >= min_score {
                hits.push((EntityId::from(id), score));
            }
        }
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits.truncate(limit);
        Ok(hits)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::temp_index;
    use crate::error::Error;
    use crate::languages::extract;
    use crate::store::FileWrite;
    use crate::types::Language;
    use std::path::Path;

    fn write(index: &Index, namespace: &str, code: &str) -> Vec<EntityId> {
        let path = Path::new("m.py");
        let extraction = extract(code, path, Language::Python).expect("parse");
        let file = FileWrite {
            path,
            language: Language::Python,
            watermark: 1,
            size_bytes: 0,
            content_hash: None,
        };
        index.write_file_atomic(namespace, &file, &extraction).expect("write").entity_ids
    }

    fn vector_count(index: &Index, namespace: &str) -> usize {
        index.stats("demo", namespace).expect("stats").vectors
    }

    #[test]
    fn search_orders_by_score_and_applies_threshold() {
        let (_dir, index) = temp_index();
        let ids = write(&index, "ws_a_00000001", "class A:\n    pass\nclass B:\n    pass\n");
        index
            .upsert_vectors(
                "ws_a_00000001",
                "test",
                &[(ids[1], vec![1.0, 0.0]), (ids[2], vec![0.6, 0.8])],
            )
            .expect("upsert");

        let hits = index
            .search_vectors("ws_a_00000001", &[1.0, 0.0], 10, 0.0)
            .expect("search");
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![ids[1], ids[2]]);

        let strict = index
            .search_vectors("ws_a_00000001", &[1.0, 0.0], 10, 0.9)
            .expect("search");
        assert_eq!(strict.len(), 1);
    }

    #[test]
    fn search_never_crosses_namespaces() {
        let (_dir, index) = temp_index();
        let a = write(&index, "ws_a_00000001", "class Util:\n    pass\n");
        let b = write(&index, "ws_b_00000002", "class Util:\n    pass\n");
        index.upsert_vectors("ws_a_00000001", "t", &[(a[1], vec![1.0])]).expect("a");
        index.upsert_vectors("ws_b_00000002", "t", &[(b[1], vec![1.0])]).expect("b");

        let hits = index.search_vectors("ws_b_00000002", &[1.0], 10, 0.0).expect("search");
        assert_eq!(hits, vec![(b[1], 1.0)]);
        assert_eq!(vector_count(&index, "ws_a_00000001"), 1);
    }

    #[test]
    fn vector_for_foreign_entity_is_rejected() {
        let (_dir, index) = temp_index();
        let a = write(&index, "ws_a_00000001", "class A:\n    pass\n");

        let err = index
            .upsert_vectors("ws_b_00000002", "t", &[(a[1], vec![1.0])])
            .expect_err("should reject");
        assert!(matches!(err, Error::ContextMismatch { .. }), "got {err:?}");
    }

    #[test]
    fn vectors_follow_entity_deletion() {
        let (_dir, index) = temp_index();
        let ids = write(&index, "ws_a_00000001", "class A:\n    pass\n");
        index.upsert_vectors("ws_a_00000001", "t", &[(ids[1], vec![1.0])]).expect("upsert");

        write(&index, "ws_a_00000001", "class Z:\n    pass\n");

        assert_eq!(vector_count(&index, "ws_a_00000001"), 0);
    }
}

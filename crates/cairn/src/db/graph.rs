//! Graph traversals implemented directly on Index.
//!
//! Each traversal takes its namespace from the starting entity and filters
//! every recursive step by it.

use rusqlite::params;

use super::helpers::{ENTITY_COLUMN_COUNT, dependency_kinds_sql, parse_relationship_kind};
use super::{ENTITY_COLUMNS, Index, row_to_entity};
use crate::error::Result;
use crate::graph::GraphQueries;
use crate::types::{Dependency, Entity, EntityId, ImpactedEntity, RelationshipKind};

/// Starting set of a traversal: the entity plus everything it defines.
///
/// Querying a type therefore covers callers of its methods too.
const SEEDS_CTE: &str = "seeds(id) AS (
    SELECT ?1
    UNION
    SELECT r.to_entity FROM relationships r
    WHERE r.from_entity = ?1 AND r.kind = 'defines' AND r.to_entity IS NOT NULL
)";

fn reached_row(row: &rusqlite::Row) -> rusqlite::Result<(Entity, u32, RelationshipKind)> {
    let entity = row_to_entity(row)?;
    let depth: u32 = row.get(ENTITY_COLUMN_COUNT)?;
    let via = parse_relationship_kind(&row.get::<_, String>(ENTITY_COLUMN_COUNT + 1)?)?;
    Ok((entity, depth, via))
}

impl Index {
    fn traverse(
        &self,
        sql: &str,
        start: &Entity,
        max_depth: u32,
        limit: usize,
    ) -> Result<Vec<(Entity, u32, RelationshipKind)>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(
                params![start.id.as_i64(), start.namespace, max_depth, limit],
                reached_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl GraphQueries for Index {
    fn find_entities(&self, name: &str, namespace: Option<&str>) -> Result<Vec<Entity>> {
        Index::find_entities(self, name, namespace)
    }

    fn entities(&self, ids: &[EntityId]) -> Result<Vec<Entity>> {
        self.get_entities(ids)
    }

    fn dependents(
        &self,
        target: &Entity,
        max_depth: u32,
        limit: usize,
    ) -> Result<Vec<ImpactedEntity>> {
        let kinds = dependency_kinds_sql();
        let sql = format!(
            "WITH RECURSIVE
             {SEEDS_CTE},
             impact(id, depth, via) AS (
                 SELECT r.from_entity, 1, r.kind
                 FROM relationships r JOIN seeds s ON r.to_entity = s.id
                 WHERE r.namespace = ?2 AND r.kind IN ({kinds})
                 UNION
                 SELECT r.from_entity, i.depth + 1, r.kind
                 FROM relationships r JOIN impact i ON r.to_entity = i.id
                 WHERE r.namespace = ?2 AND r.kind IN ({kinds}) AND i.depth < ?3
             )
             SELECT {ENTITY_COLUMNS}, MIN(i.depth), i.via
             FROM impact i JOIN entities e ON e.id = i.id
             WHERE e.namespace = ?2 AND i.id NOT IN (SELECT id FROM seeds)
             GROUP BY i.id
             ORDER BY MIN(i.depth), e.name, e.id
             LIMIT ?4"
        );
        Ok(self
            .traverse(&sql, target, max_depth, limit)?
            .into_iter()
            .map(|(entity, distance, via)| ImpactedEntity {
                entity,
                distance,
                via,
            })
            .collect())
    }

    fn dependencies(&self, root: &Entity, max_depth: u32, limit: usize) -> Result<Vec<Dependency>> {
        let kinds = dependency_kinds_sql();
        let sql = format!(
            "WITH RECURSIVE
             {SEEDS_CTE},
             chain(id, depth, via) AS (
                 SELECT r.to_entity, 1, r.kind
                 FROM relationships r JOIN seeds s ON r.from_entity = s.id
                 WHERE r.namespace = ?2 AND r.kind IN ({kinds}) AND r.to_entity IS NOT NULL
                 UNION
                 SELECT r.to_entity, c.depth + 1, r.kind
                 FROM relationships r JOIN chain c ON r.from_entity = c.id
                 WHERE r.namespace = ?2 AND r.kind IN ({kinds})
                   AND r.to_entity IS NOT NULL AND c.depth < ?3
             )
             SELECT {ENTITY_COLUMNS}, MIN(c.depth), c.via
             FROM chain c JOIN entities e ON e.id = c.id
             WHERE e.namespace = ?2 AND c.id NOT IN (SELECT id FROM seeds)
             GROUP BY c.id
             ORDER BY MIN(c.depth), e.name, e.id
             LIMIT ?4"
        );
        Ok(self
            .traverse(&sql, root, max_depth, limit)?
            .into_iter()
            .map(|(entity, depth, via)| Dependency { entity, depth, via })
            .collect())
    }

    fn callers(&self, id: EntityId) -> Result<Vec<Entity>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT {ENTITY_COLUMNS}
             FROM relationships r JOIN entities e ON e.id = r.from_entity
             WHERE r.to_entity = ?1 AND r.kind = 'calls' AND e.namespace = r.namespace
             ORDER BY e.name, e.id"
        ))?;
        let callers = stmt
            .query_map([id.as_i64()], row_to_entity)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(callers)
    }

    fn type_edges(&self, namespace: &str) -> Result<Vec<(EntityId, EntityId)>> {
        let kinds = dependency_kinds_sql();
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "WITH owner(entity, type_id) AS (
                 SELECT e.id, e.id FROM entities e
                 WHERE e.namespace = ?1 AND e.kind = 'type'
                 UNION ALL
                 SELECT r.to_entity, r.from_entity
                 FROM relationships r
                 JOIN entities p ON p.id = r.from_entity
                 JOIN entities c ON c.id = r.to_entity
                 WHERE r.namespace = ?1 AND r.kind = 'defines'
                   AND p.kind = 'type' AND c.kind != 'type'
             )
             SELECT DISTINCT src.type_id, dst.type_id
             FROM relationships r
             JOIN owner src ON src.entity = r.from_entity
             JOIN owner dst ON dst.entity = r.to_entity
             WHERE r.namespace = ?1 AND r.kind IN ({kinds}) AND src.type_id != dst.type_id
             ORDER BY 1, 2"
        ))?;
        let edges = stmt
            .query_map([namespace], |row| {
                Ok((
                    EntityId::from(row.get::<_, i64>(0)?),
                    EntityId::from(row.get::<_, i64>(1)?),
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(edges)
    }
}

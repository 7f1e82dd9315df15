//! Graph queries for dependency analysis.
//!
//! This module provides:
//! - Impact analysis (who transitively depends on this entity?)
//! - Dependency chains (what does this entity transitively depend on?)
//! - Circular dependency detection between types
//!
//! ## Design
//!
//! - `GraphQueries` defines the storage-level traversals; `Index` implements
//!   them with recursive CTEs
//! - Every traversal is bound to the namespace of the entity it starts from.
//!   A workspace hint only chooses which entities are starting points.
//! - Cycle detection loads a type-level graph per namespace into petgraph

mod cycles;

pub use cycles::find_cycles;

use crate::error::{Error, Result};
use crate::types::{
    Dependency, DependencyChain, Entity, EntityId, ImpactReport, ImpactedEntity,
};

/// Storage-level traversals used by the query engine.
pub trait GraphQueries: Send + Sync {
    /// Entities matching a qualified or simple name, optionally within one namespace.
    fn find_entities(&self, name: &str, namespace: Option<&str>) -> Result<Vec<Entity>>;

    /// Entities by id, in the order given, skipping missing ids.
    fn entities(&self, ids: &[EntityId]) -> Result<Vec<Entity>>;

    /// Reverse closure over dependency edges within `target.namespace`.
    ///
    /// Ordered by distance, then name; at most `limit` rows.
    fn dependents(&self, target: &Entity, max_depth: u32, limit: usize)
    -> Result<Vec<ImpactedEntity>>;

    /// Forward closure over dependency edges within `root.namespace`.
    ///
    /// Ordered by depth, then name; at most `limit` rows.
    fn dependencies(&self, root: &Entity, max_depth: u32, limit: usize) -> Result<Vec<Dependency>>;

    /// Entities with a direct `Calls` edge to the given entity.
    fn callers(&self, id: EntityId) -> Result<Vec<Entity>>;

    /// Type-level dependency edges of one namespace, member edges lifted to
    /// their owning types. Self-edges are excluded.
    fn type_edges(&self, namespace: &str) -> Result<Vec<(EntityId, EntityId)>>;
}

/// Caps applied to traversal queries.
#[derive(Debug, Clone, Copy)]
pub struct QueryLimits {
    /// Maximum impacted entities per target
    pub impact_limit: usize,
    /// Maximum dependencies per root
    pub chain_limit: usize,
    /// Upper bound for any traversal depth
    pub max_depth: u32,
}

/// Reverse transitive dependents of every entity named `name`.
///
/// `namespace` narrows which entities are targets; each traversal stays in
/// its target's own namespace. `workspace_of` maps a namespace to the
/// workspace name shown in the report.
pub fn impact_analysis(
    graph: &dyn GraphQueries,
    name: &str,
    namespace: Option<&str>,
    limits: QueryLimits,
    workspace_of: impl Fn(&str) -> String,
) -> Result<Vec<ImpactReport>> {
    let targets = targets(graph, name, namespace)?;
    let mut reports = Vec::with_capacity(targets.len());

    for target in targets {
        let mut impacted =
            graph.dependents(&target, limits.max_depth, limits.impact_limit.saturating_add(1))?;
        impacted.retain(|i| same_namespace(&target, &i.entity));
        let truncated = impacted.len() > limits.impact_limit;
        impacted.truncate(limits.impact_limit);

        tracing::debug!(
            target = %target.name,
            namespace = %target.namespace,
            impacted = impacted.len(),
            truncated,
            "Impact analysis"
        );
        reports.push(ImpactReport {
            workspace: workspace_of(&target.namespace),
            target,
            impacted,
            truncated,
        });
    }
    Ok(reports)
}

/// Forward dependencies of every entity named `name`, up to `max_depth` hops.
///
/// `max_depth` is clamped to `1..=limits.max_depth`.
pub fn dependency_chain(
    graph: &dyn GraphQueries,
    name: &str,
    max_depth: u32,
    namespace: Option<&str>,
    limits: QueryLimits,
    workspace_of: impl Fn(&str) -> String,
) -> Result<Vec<DependencyChain>> {
    let depth = max_depth.clamp(1, limits.max_depth.max(1));
    let roots = targets(graph, name, namespace)?;
    let mut chains = Vec::with_capacity(roots.len());

    for root in roots {
        let mut dependencies =
            graph.dependencies(&root, depth, limits.chain_limit.saturating_add(1))?;
        dependencies.retain(|d| same_namespace(&root, &d.entity));
        let truncated = dependencies.len() > limits.chain_limit;
        dependencies.truncate(limits.chain_limit);

        chains.push(DependencyChain {
            workspace: workspace_of(&root.namespace),
            root,
            dependencies,
            truncated,
        });
    }
    Ok(chains)
}

fn targets(graph: &dyn GraphQueries, name: &str, namespace: Option<&str>) -> Result<Vec<Entity>> {
    let targets = graph.find_entities(name, namespace)?;
    if targets.is_empty() {
        return Err(Error::NotFound(match namespace {
            Some(ns) => format!("entity '{name}' in namespace '{ns}'"),
            None => format!("entity '{name}'"),
        }));
    }
    Ok(targets)
}

fn same_namespace(anchor: &Entity, other: &Entity) -> bool {
    if anchor.namespace == other.namespace {
        return true;
    }
    tracing::error!(
        anchor = %anchor.name,
        expected = %anchor.namespace,
        found = %other.namespace,
        "Traversal crossed a workspace boundary; dropping row"
    );
    false
}

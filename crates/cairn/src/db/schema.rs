//! Database schema definition for Cairn.
//!
//! Every row carries the storage namespace of its workspace. Triggers reject
//! relationships and vectors whose endpoints live in another namespace, so the
//! isolation invariant holds even for writes that bypass the index writer.

/// Database schema definition.
pub(crate) const SCHEMA: &str = r"
-- Registered workspaces
CREATE TABLE IF NOT EXISTS workspaces (
    name TEXT PRIMARY KEY,
    root_path TEXT NOT NULL,
    storage_namespace TEXT NOT NULL UNIQUE,
    registered_at TEXT NOT NULL
);

-- Indexed source files, one row per (namespace, path)
-- last_indexed_at is the mtime observed before the file was read
CREATE TABLE IF NOT EXISTS files (
    namespace TEXT NOT NULL,
    path TEXT NOT NULL,
    language TEXT NOT NULL,
    last_indexed_at INTEGER NOT NULL,
    indexed_at INTEGER NOT NULL,
    size_bytes INTEGER NOT NULL,
    content_hash INTEGER,
    PRIMARY KEY (namespace, path)
);

-- Entities: files, types, methods, properties
-- The file foreign key is deferred so a file's rows can be rewritten in any
-- order inside one transaction.
CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY,
    namespace TEXT NOT NULL,
    file_path TEXT NOT NULL,
    kind TEXT NOT NULL,
    flavor TEXT,
    name TEXT NOT NULL,
    simple_name TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    signature TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    FOREIGN KEY (namespace, file_path) REFERENCES files(namespace, path)
        ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
);

CREATE INDEX IF NOT EXISTS idx_entities_file ON entities(namespace, file_path);
CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(namespace, name);
CREATE INDEX IF NOT EXISTS idx_entities_simple_name ON entities(namespace, simple_name);

-- Typed edges. to_entity is NULL while the target is unresolved; target_name
-- is kept so a later file write can resolve it. target_simple is the last
-- path segment of target_name, the key relinking looks edges up by.
CREATE TABLE IF NOT EXISTS relationships (
    id INTEGER PRIMARY KEY,
    namespace TEXT NOT NULL,
    file_path TEXT NOT NULL,
    kind TEXT NOT NULL,
    from_entity INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
    to_entity INTEGER REFERENCES entities(id) ON DELETE SET NULL,
    target_name TEXT NOT NULL,
    target_simple TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_relationships_from ON relationships(from_entity);
CREATE INDEX IF NOT EXISTS idx_relationships_to ON relationships(to_entity);
CREATE INDEX IF NOT EXISTS idx_relationships_kind ON relationships(namespace, kind);
CREATE INDEX IF NOT EXISTS idx_relationships_unresolved
    ON relationships(namespace, target_simple) WHERE to_entity IS NULL;

-- Entity embeddings
CREATE TABLE IF NOT EXISTS vectors (
    entity_id INTEGER PRIMARY KEY REFERENCES entities(id) ON DELETE CASCADE,
    namespace TEXT NOT NULL,
    model TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    embedding BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_vectors_namespace ON vectors(namespace);

-- Isolation: both endpoints of an edge share the edge's namespace
CREATE TRIGGER IF NOT EXISTS relationships_context_insert
BEFORE INSERT ON relationships
BEGIN
    SELECT RAISE(ABORT, 'context mismatch: source entity belongs to another workspace')
    WHERE (SELECT namespace FROM entities WHERE id = NEW.from_entity) IS NOT NEW.namespace;
    SELECT RAISE(ABORT, 'context mismatch: target entity belongs to another workspace')
    WHERE NEW.to_entity IS NOT NULL
      AND (SELECT namespace FROM entities WHERE id = NEW.to_entity) IS NOT NEW.namespace;
END;

CREATE TRIGGER IF NOT EXISTS relationships_context_update
BEFORE UPDATE OF namespace, from_entity, to_entity ON relationships
BEGIN
    SELECT RAISE(ABORT, 'context mismatch: source entity belongs to another workspace')
    WHERE (SELECT namespace FROM entities WHERE id = NEW.from_entity) IS NOT NEW.namespace;
    SELECT RAISE(ABORT, 'context mismatch: target entity belongs to another workspace')
    WHERE NEW.to_entity IS NOT NULL
      AND (SELECT namespace FROM entities WHERE id = NEW.to_entity) IS NOT NEW.namespace;
END;

CREATE TRIGGER IF NOT EXISTS vectors_context_insert
BEFORE INSERT ON vectors
BEGIN
    SELECT RAISE(ABORT, 'context mismatch: vector entity belongs to another workspace')
    WHERE (SELECT namespace FROM entities WHERE id = NEW.entity_id) IS NOT NEW.namespace;
END;
";

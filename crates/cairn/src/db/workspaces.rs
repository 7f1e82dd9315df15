//! Workspace registry persistence.

use rusqlite::OptionalExtension;
use rusqlite::params;

use super::Index;
use super::helpers::{WORKSPACE_COLUMNS, row_to_workspace};
use crate::error::Result;
use crate::languages::common::normalize_path;
use crate::types::WorkspaceContext;

impl Index {
    /// Persist a workspace registration. Existing rows are left untouched.
    pub fn insert_workspace(&self, context: &WorkspaceContext) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO workspaces (name, root_path, storage_namespace, registered_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO NOTHING",
            params![
                context.name,
                normalize_path(&context.root_path),
                context.storage_namespace,
                context.registered_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a workspace by name.
    pub fn get_workspace(&self, name: &str) -> Result<Option<WorkspaceContext>> {
        let conn = self.reader()?;
        conn.query_row(
            &format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE name = ?1"),
            [name],
            row_to_workspace,
        )
        .optional()
        .map_err(Into::into)
    }

    /// All registered workspaces, ordered by name.
    pub fn list_workspaces(&self) -> Result<Vec<WorkspaceContext>> {
        let conn = self.reader()?;
        let mut stmt =
            conn.prepare(&format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces ORDER BY name"))?;
        let workspaces = stmt
            .query_map([], row_to_workspace)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(workspaces)
    }

    /// Remove a workspace registration and every row in its namespace.
    ///
    /// Returns `false` when no workspace had that name.
    pub fn delete_workspace(&self, context: &WorkspaceContext) -> Result<bool> {
        self.clear_namespace(&context.storage_namespace)?;
        let conn = self.writer()?;
        let deleted = conn.execute("DELETE FROM workspaces WHERE name = ?1", [&context.name])?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::temp_index;
    use chrono::Utc;
    use std::path::PathBuf;

    fn context(name: &str, root: &str) -> WorkspaceContext {
        WorkspaceContext {
            name: name.to_string(),
            root_path: PathBuf::from(root),
            storage_namespace: WorkspaceContext::namespace_for(name),
            registered_at: Utc::now(),
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let (_dir, index) = temp_index();
        let ctx = context("alpha", "/src/alpha");
        index.insert_workspace(&ctx).expect("insert");

        let loaded = index.get_workspace("alpha").expect("get").expect("present");
        assert_eq!(loaded.name, "alpha");
        assert_eq!(loaded.root_path, PathBuf::from("/src/alpha"));
        assert_eq!(loaded.storage_namespace, ctx.storage_namespace);
    }

    #[test]
    fn insert_is_idempotent_and_keeps_first_registration() {
        let (_dir, index) = temp_index();
        index.insert_workspace(&context("alpha", "/a")).expect("first");
        index.insert_workspace(&context("alpha", "/b")).expect("second");

        let all = index.list_workspaces().expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].root_path, PathBuf::from("/a"));
    }

    #[test]
    fn list_is_sorted_and_delete_removes() {
        let (_dir, index) = temp_index();
        let beta = context("beta", "/b");
        index.insert_workspace(&beta).expect("insert");
        index.insert_workspace(&context("alpha", "/a")).expect("insert");

        let names: Vec<String> = index
            .list_workspaces()
            .expect("list")
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        assert!(index.delete_workspace(&beta).expect("delete"));
        assert!(index.get_workspace("beta").expect("get").is_none());
        assert!(!index.delete_workspace(&beta).expect("second delete"));
    }
}

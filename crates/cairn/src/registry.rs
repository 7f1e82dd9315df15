//! Workspace registry: the set of indexed workspaces and their namespaces.
//!
//! The registry is loaded from the database when [`Cairn`](crate::Cairn)
//! opens and lives as long as that handle. Registrations are written through
//! to the database first, then mirrored into the in-memory map.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::info;

use crate::db::Index;
use crate::error::{Error, Result};
use crate::types::WorkspaceContext;

/// Registered workspaces, keyed by name.
#[derive(Debug, Default)]
pub struct Registry {
    workspaces: RwLock<HashMap<String, WorkspaceContext>>,
}

impl Registry {
    /// Load every persisted registration.
    pub fn load(index: &Index) -> Result<Self> {
        let workspaces = index
            .list_workspaces()?
            .into_iter()
            .map(|ctx| (ctx.name.clone(), ctx))
            .collect::<HashMap<_, _>>();
        tracing::debug!(count = workspaces.len(), "Loaded workspace registry");
        Ok(Self {
            workspaces: RwLock::new(workspaces),
        })
    }

    /// Register a directory as a workspace.
    ///
    /// The path is canonicalized and the name defaults to the directory name.
    /// Registering the same name and root again returns the existing context;
    /// the same name with another root fails with [`Error::Config`].
    pub fn register(
        &self,
        index: &Index,
        path: &Path,
        name: Option<&str>,
    ) -> Result<WorkspaceContext> {
        let root = path.canonicalize().map_err(|e| {
            Error::Config(format!("cannot register {}: {e}", path.display()))
        })?;
        if !root.is_dir() {
            return Err(Error::Config(format!("{} is not a directory", root.display())));
        }
        let name = match name {
            Some(n) => n.trim().to_string(),
            None => root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        if name.is_empty() {
            return Err(Error::Config(
                "workspace name cannot be empty; pass one explicitly".to_string(),
            ));
        }

        let mut workspaces = self.write()?;
        if let Some(existing) = workspaces.get(&name) {
            if existing.root_path == root {
                return Ok(existing.clone());
            }
            return Err(Error::Config(format!(
                "workspace '{name}' is already registered at {}",
                existing.root_path.display()
            )));
        }

        let context = WorkspaceContext {
            storage_namespace: WorkspaceContext::namespace_for(&name),
            name: name.clone(),
            root_path: root,
            registered_at: Utc::now(),
        };
        if let Some(other) = workspaces
            .values()
            .find(|w| w.storage_namespace == context.storage_namespace)
        {
            return Err(Error::Internal(format!(
                "namespace collision between '{}' and '{name}'",
                other.name
            )));
        }
        index.insert_workspace(&context)?;
        info!(
            workspace = %name,
            root = %context.root_path.display(),
            namespace = %context.storage_namespace,
            "Registered workspace"
        );
        workspaces.insert(name, context.clone());
        Ok(context)
    }

    /// Get a workspace by name.
    pub fn get(&self, name: &str) -> Result<Option<WorkspaceContext>> {
        Ok(self.read()?.get(name).cloned())
    }

    /// Get a workspace by name, failing with [`Error::NotFound`] when absent.
    pub fn resolve(&self, name: &str) -> Result<WorkspaceContext> {
        self.get(name)?
            .ok_or_else(|| Error::NotFound(format!("workspace '{name}'")))
    }

    /// All workspaces, ordered by name.
    pub fn list(&self) -> Result<Vec<WorkspaceContext>> {
        let mut all: Vec<WorkspaceContext> = self.read()?.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    /// Name of the workspace that owns a storage namespace.
    pub fn name_for_namespace(&self, namespace: &str) -> Result<Option<String>> {
        Ok(self
            .read()?
            .values()
            .find(|w| w.storage_namespace == namespace)
            .map(|w| w.name.clone()))
    }

    /// Remove a workspace and everything indexed for it.
    pub fn unregister(&self, index: &Index, name: &str) -> Result<WorkspaceContext> {
        let mut workspaces = self.write()?;
        let context = workspaces
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("workspace '{name}'")))?;
        index.delete_workspace(&context)?;
        workspaces.remove(name);
        info!(workspace = %name, "Unregistered workspace");
        Ok(context)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, WorkspaceContext>>> {
        self.workspaces
            .read()
            .map_err(|e| Error::Internal(format!("workspace registry poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, WorkspaceContext>>> {
        self.workspaces
            .write()
            .map_err(|e| Error::Internal(format!("workspace registry poisoned: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::temp_index;

    #[test]
    fn register_defaults_name_to_directory() {
        let (_data, index) = temp_index();
        let parent = tempfile::tempdir().expect("tmp");
        let root = parent.path().join("billing");
        std::fs::create_dir(&root).expect("mkdir");
        let registry = Registry::default();

        let ctx = registry.register(&index, &root, None).expect("register");
        assert_eq!(ctx.name, "billing");
        assert_eq!(ctx.root_path, root.canonicalize().expect("canonical"));
        assert_eq!(ctx.storage_namespace, WorkspaceContext::namespace_for("billing"));
    }

    #[test]
    fn register_is_idempotent_for_same_root() {
        let (_data, index) = temp_index();
        let root = tempfile::tempdir().expect("tmp");
        let registry = Registry::default();

        let first = registry.register(&index, root.path(), Some("demo")).expect("first");
        let second = registry.register(&index, root.path(), Some("demo")).expect("second");
        assert_eq!(first, second);
        assert_eq!(registry.list().expect("list").len(), 1);
    }

    #[test]
    fn register_rejects_same_name_with_other_root() {
        let (_data, index) = temp_index();
        let a = tempfile::tempdir().expect("tmp");
        let b = tempfile::tempdir().expect("tmp");
        let registry = Registry::default();
        registry.register(&index, a.path(), Some("demo")).expect("first");

        let err = registry
            .register(&index, b.path(), Some("demo"))
            .expect_err("conflict");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn registrations_survive_reload() {
        let (_data, index) = temp_index();
        let root = tempfile::tempdir().expect("tmp");
        Registry::default()
            .register(&index, root.path(), Some("demo"))
            .expect("register");

        let reloaded = Registry::load(&index).expect("load");
        let ctx = reloaded.resolve("demo").expect("resolve");
        assert_eq!(
            reloaded.name_for_namespace(&ctx.storage_namespace).expect("lookup"),
            Some("demo".to_string())
        );
    }

    #[test]
    fn unregister_and_resolve_missing() {
        let (_data, index) = temp_index();
        let root = tempfile::tempdir().expect("tmp");
        let registry = Registry::default();
        registry.register(&index, root.path(), Some("demo")).expect("register");

        registry.unregister(&index, "demo").expect("unregister");
        assert!(matches!(registry.resolve("demo"), Err(Error::NotFound(_))));
        assert!(matches!(registry.unregister(&index, "demo"), Err(Error::NotFound(_))));
        assert!(index.get_workspace("demo").expect("get").is_none());
    }
}

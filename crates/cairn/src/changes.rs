//! Change detection between the filesystem and the recorded index.
//!
//! [`discover`] lists the source files under a workspace root with their
//! modification times. [`diff`] compares that listing against the previous
//! [`IndexSnapshot`] and classifies every path:
//!
//! ```text
//! added     = current \ previous
//! deleted   = previous \ current
//! modified  = { p ∈ current ∩ previous | mtime(p) > watermark(p) }
//! unchanged = { p ∈ current ∩ previous | mtime(p) ≤ watermark(p) }
//! ```
//!
//! The diff itself is linear in the listing; everything downstream only
//! touches `added`, `modified`, and `deleted`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::types::{FileRecord, Language};

/// A source file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Modification time, ns since the Unix epoch
    pub mtime_ns: i64,
}

/// Result of walking a workspace.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Source files, sorted by path
    pub files: Vec<DiscoveredFile>,
    /// Directories that could not be read, with the reason
    pub unreadable_dirs: Vec<(PathBuf, String)>,
}

/// Previously recorded state of a workspace: path → watermark.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSnapshot {
    watermarks: HashMap<PathBuf, i64>,
}

impl IndexSnapshot {
    /// Build a snapshot from stored file records.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = FileRecord>) -> Self {
        Self {
            watermarks: records
                .into_iter()
                .map(|r| (r.path, r.last_indexed_at))
                .collect(),
        }
    }

    /// Build a snapshot directly from `(path, watermark)` pairs.
    #[must_use]
    pub fn from_watermarks(entries: impl IntoIterator<Item = (PathBuf, i64)>) -> Self {
        Self {
            watermarks: entries.into_iter().collect(),
        }
    }

    /// Watermark recorded for a path.
    #[must_use]
    pub fn watermark(&self, path: &Path) -> Option<i64> {
        self.watermarks.get(path).copied()
    }

    /// Number of recorded files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.watermarks.len()
    }

    /// Returns `true` if nothing has been indexed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watermarks.is_empty()
    }
}

/// Classification of every path in the current listing and the previous snapshot.
///
/// All lists are sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    /// In the listing but not the snapshot
    pub added: Vec<PathBuf>,
    /// In both, with an mtime past the watermark
    pub modified: Vec<PathBuf>,
    /// In the snapshot but not the listing
    pub deleted: Vec<PathBuf>,
    /// In both, not modified
    pub unchanged: Vec<PathBuf>,
}

impl ChangeSet {
    /// Files that need extraction (`added ∪ modified`).
    pub fn to_extract(&self) -> impl Iterator<Item = &PathBuf> {
        self.added.iter().chain(self.modified.iter())
    }

    /// Number of files needing any work.
    #[must_use]
    pub fn work_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    /// Returns `true` if the index already matches the filesystem.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.work_count() == 0
    }
}

/// Compare the current listing against the previous snapshot.
#[must_use]
pub fn diff(current: &[DiscoveredFile], previous: &IndexSnapshot) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut seen: HashSet<&Path> = HashSet::with_capacity(current.len());

    for file in current {
        if !seen.insert(file.path.as_path()) {
            continue;
        }
        match previous.watermark(&file.path) {
            None => changes.added.push(file.path.clone()),
            Some(watermark) if file.mtime_ns > watermark => {
                changes.modified.push(file.path.clone());
            }
            Some(_) => changes.unchanged.push(file.path.clone()),
        }
    }

    changes.deleted = previous
        .watermarks
        .keys()
        .filter(|p| !seen.contains(p.as_path()))
        .cloned()
        .collect();

    changes.added.sort();
    changes.modified.sort();
    changes.deleted.sort();
    changes.unchanged.sort();
    changes
}

/// Walk a workspace root and list every indexable source file.
///
/// Hidden directories and configured excluded directories are skipped.
/// Symlinked directories are not followed, so a link cannot pull files from
/// outside the root into the workspace.
#[must_use]
pub fn discover(root: &Path, config: &Config) -> Discovery {
    let mut discovery = Discovery::default();
    walk_dir(root, root, config, &mut discovery);
    discovery.files.sort_by(|a, b| a.path.cmp(&b.path));
    discovery
}

fn walk_dir(root: &Path, dir: &Path, config: &Config, discovery: &mut Discovery) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!(
                directory = %dir.display(),
                error = %e,
                "Cannot read directory, skipping"
            );
            discovery
                .unreadable_dirs
                .push((dir.to_path_buf(), e.to_string()));
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(
                    directory = %dir.display(),
                    error = %e,
                    "Failed to read directory entry, skipping"
                );
                continue;
            }
        };
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if file_type.is_dir() {
            if name.starts_with('.') || config.is_excluded_dir(&name) {
                continue;
            }
            walk_dir(root, &path, config, discovery);
            continue;
        }

        // Symlinks to files are indexed; symlinks to directories are not followed.
        if !(file_type.is_file() || (file_type.is_symlink() && path.is_file())) {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if Language::from_extension(ext).is_none() || !config.is_allowed_extension(ext) {
            continue;
        }
        let Some(mtime_ns) = std::fs::metadata(&path).ok().and_then(|m| mtime_ns(&m)) else {
            warn!(path = %path.display(), "Cannot read modification time, skipping");
            continue;
        };
        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        discovery.files.push(DiscoveredFile {
            path: relative,
            mtime_ns,
        });
    }
}

/// Modification time in ns since the Unix epoch.
// u128 nanoseconds won't exceed i64::MAX until year 2262
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
#[must_use]
pub fn mtime_ns(metadata: &std::fs::Metadata) -> Option<i64> {
    metadata
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_nanos() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::{BTreeMap, BTreeSet};
    use tempfile::TempDir;

    fn file(path: &str, mtime_ns: i64) -> DiscoveredFile {
        DiscoveredFile {
            path: PathBuf::from(path),
            mtime_ns,
        }
    }

    fn paths(list: &[PathBuf]) -> Vec<&str> {
        list.iter().map(|p| p.to_str().expect("utf8")).collect()
    }

    #[test]
    fn classifies_each_path() {
        let previous = IndexSnapshot::from_watermarks([
            (PathBuf::from("same.rs"), 100),
            (PathBuf::from("edited.rs"), 100),
            (PathBuf::from("gone.rs"), 100),
        ]);
        let current = [file("same.rs", 100), file("edited.rs", 101), file("new.rs", 5)];

        let changes = diff(&current, &previous);

        assert_eq!(paths(&changes.added), vec!["new.rs"]);
        assert_eq!(paths(&changes.modified), vec!["edited.rs"]);
        assert_eq!(paths(&changes.deleted), vec!["gone.rs"]);
        assert_eq!(paths(&changes.unchanged), vec!["same.rs"]);
        assert_eq!(changes.work_count(), 3);
    }

    #[test]
    fn older_mtime_is_unchanged() {
        let previous = IndexSnapshot::from_watermarks([(PathBuf::from("a.rs"), 100)]);
        let changes = diff(&[file("a.rs", 50)], &previous);
        assert_eq!(paths(&changes.unchanged), vec!["a.rs"]);
        assert!(changes.is_clean());
    }

    #[test]
    fn empty_snapshot_marks_everything_added() {
        let changes = diff(&[file("b.rs", 1), file("a.rs", 1)], &IndexSnapshot::default());
        assert_eq!(paths(&changes.added), vec!["a.rs", "b.rs"]);
    }

    fn write(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, "x").expect("write");
    }

    #[test]
    fn discover_skips_excluded_and_hidden_dirs() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "src/lib.rs");
        write(dir.path(), "src/App.cs");
        write(dir.path(), "tools/run.py");
        write(dir.path(), "README.md");
        write(dir.path(), "target/debug/gen.rs");
        write(dir.path(), "node_modules/x/index.py");
        write(dir.path(), ".git/hooks/pre.py");
        write(dir.path(), ".hidden/secret.rs");
        write(dir.path(), "pkg/__pycache__/m.py");

        let discovery = discover(dir.path(), &Config::default());

        let found: Vec<_> = discovery
            .files
            .iter()
            .map(|f| f.path.to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(found, vec!["src/App.cs", "src/lib.rs", "tools/run.py"]);
    }

    #[test]
    fn discover_honors_extension_allow_list() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "a.rs");
        write(dir.path(), "b.py");
        let config = Config {
            extensions: vec!["py".to_string()],
            ..Config::default()
        };

        let discovery = discover(dir.path(), &config);

        assert_eq!(discovery.files.len(), 1);
        assert_eq!(discovery.files[0].path, PathBuf::from("b.py"));
    }

    #[cfg(unix)]
    #[test]
    fn discover_does_not_follow_directory_symlinks() {
        let outside = TempDir::new().expect("tempdir");
        write(outside.path(), "leak.rs");
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "main.rs");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked"))
            .expect("symlink");

        let discovery = discover(dir.path(), &Config::default());

        assert_eq!(discovery.files.len(), 1);
        assert_eq!(discovery.files[0].path, PathBuf::from("main.rs"));
    }

    fn listing_strategy() -> impl Strategy<Value = BTreeMap<String, i64>> {
        prop::collection::btree_map("[a-e]{1,2}\\.rs", 0i64..10, 0..12)
    }

    proptest! {
        #[test]
        fn diff_partitions_the_union(
            current in listing_strategy(),
            previous in listing_strategy(),
        ) {
            let listing: Vec<DiscoveredFile> = current
                .iter()
                .map(|(p, m)| file(p, *m))
                .collect();
            let snapshot = IndexSnapshot::from_watermarks(
                previous.iter().map(|(p, m)| (PathBuf::from(p), *m)),
            );

            let changes = diff(&listing, &snapshot);

            let cur: BTreeSet<PathBuf> = current.keys().map(PathBuf::from).collect();
            let prev: BTreeSet<PathBuf> = previous.keys().map(PathBuf::from).collect();

            let added: BTreeSet<_> = changes.added.iter().cloned().collect();
            let deleted: BTreeSet<_> = changes.deleted.iter().cloned().collect();
            let modified: BTreeSet<_> = changes.modified.iter().cloned().collect();
            let unchanged: BTreeSet<_> = changes.unchanged.iter().cloned().collect();

            prop_assert_eq!(&added, &cur.difference(&prev).cloned().collect::<BTreeSet<_>>());
            prop_assert_eq!(&deleted, &prev.difference(&cur).cloned().collect::<BTreeSet<_>>());
            let both: BTreeSet<PathBuf> = cur.intersection(&prev).cloned().collect();
            prop_assert_eq!(&modified.union(&unchanged).cloned().collect::<BTreeSet<_>>(), &both);
            prop_assert!(modified.is_disjoint(&unchanged));
            for path in &modified {
                let key = path.to_str().expect("utf8");
                prop_assert!(current[key] > previous[key]);
            }
            prop_assert!(changes.added.windows(2).all(|w| w[0] < w[1]));
        }
    }
}

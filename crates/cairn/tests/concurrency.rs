//! Integration tests for concurrent use of one `Cairn` handle.
//!
//! - Reindexes of different workspaces run in parallel
//! - A second reindex of the same workspace is rejected, never interleaved
//! - Queries keep working while a reindex writes
//! - Cancellation stops new work

use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use cairn::{Cairn, CancellationToken, Config, Error, ReindexOptions};
use tempfile::TempDir;

fn write_modules(root: &Path, count: usize) {
    for i in 0..count {
        let next = (i + 1) % count;
        fs::write(
            root.join(format!("mod_{i}.py")),
            format!(
                "class Service{i}:\n    def run(self):\n        step_{next}()\n\ndef step_{i}():\n    pass\n"
            ),
        )
        .expect("failed to write module");
    }
}

fn cairn_with_workspaces(names: &[&str], files_each: usize) -> (Vec<TempDir>, TempDir, Arc<Cairn>) {
    let data = tempfile::tempdir().expect("data dir");
    let cairn = Cairn::open(Config::with_data_dir(data.path())).expect("open");
    let roots: Vec<TempDir> = names
        .iter()
        .map(|name| {
            let root = tempfile::tempdir().expect("root dir");
            write_modules(root.path(), files_each);
            cairn.register_workspace(root.path(), Some(name)).expect("register");
            root
        })
        .collect();
    (roots, data, Arc::new(cairn))
}

#[test]
fn different_workspaces_reindex_in_parallel() {
    let names = ["north", "south", "east", "west"];
    let (_roots, _data, cairn) = cairn_with_workspaces(&names, 20);
    let barrier = Arc::new(Barrier::new(names.len()));

    let handles: Vec<_> = names
        .iter()
        .map(|name| {
            let cairn = Arc::clone(&cairn);
            let barrier = Arc::clone(&barrier);
            let name = (*name).to_string();
            thread::spawn(move || {
                barrier.wait();
                cairn.reindex(&name, &ReindexOptions::default(), &CancellationToken::new())
            })
        })
        .collect();

    for handle in handles {
        let report = handle.join().expect("thread panicked").expect("reindex failed");
        assert_eq!(report.added, 20);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
    }

    for name in names {
        let stats = cairn.stats(name).expect("stats");
        assert_eq!(stats.files, 20);
        assert_eq!(stats.unresolved_relationships, 0, "all step_N calls resolve");
    }
}

#[test]
fn same_workspace_reindexes_never_interleave() {
    let (_roots, _data, cairn) = cairn_with_workspaces(&["busy"], 150);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let cairn = Arc::clone(&cairn);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cairn.reindex("busy", &ReindexOptions::default(), &CancellationToken::new())
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect();

    let mut added = 0;
    for result in results {
        match result {
            Ok(report) => added += report.added,
            Err(Error::ConcurrentReindex(name)) => assert_eq!(name, "busy"),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(added, 150, "each file is added exactly once");
    assert_eq!(cairn.stats("busy").expect("stats").files, 150);
}

#[test]
fn queries_run_while_another_workspace_reindexes() {
    let (_roots, _data, cairn) = cairn_with_workspaces(&["ready", "loading"], 60);
    cairn
        .reindex("ready", &ReindexOptions::default(), &CancellationToken::new())
        .expect("initial reindex");

    let writer = {
        let cairn = Arc::clone(&cairn);
        thread::spawn(move || {
            cairn.reindex("loading", &ReindexOptions::default(), &CancellationToken::new())
        })
    };

    for _ in 0..20 {
        let reports = cairn.impact_analysis("step_3", Some("ready")).expect("impact");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].workspace, "ready");
        assert!(reports[0].impacted.iter().any(|i| i.entity.name == "Service2.run"));
    }

    let report = writer.join().expect("thread panicked").expect("reindex");
    assert_eq!(report.added, 60);
}

#[test]
fn cancelled_reindex_does_no_work_and_can_resume() {
    let (_roots, _data, cairn) = cairn_with_workspaces(&["halt"], 10);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = cairn
        .reindex("halt", &ReindexOptions::default(), &cancel)
        .expect("reindex");
    assert!(report.cancelled);
    assert_eq!(report.files_written(), 0);
    assert_eq!(cairn.stats("halt").expect("stats").files, 0);

    let resumed = cairn
        .reindex("halt", &ReindexOptions::default(), &CancellationToken::new())
        .expect("reindex");
    assert!(!resumed.cancelled);
    assert_eq!(resumed.added, 10);
}

#[test]
fn cancelling_mid_pass_keeps_the_index_consistent() {
    let (_roots, _data, cairn) = cairn_with_workspaces(&["midway"], 200);
    let cancel = CancellationToken::new();

    let worker = {
        let cairn = Arc::clone(&cairn);
        let cancel = cancel.clone();
        thread::spawn(move || cairn.reindex("midway", &ReindexOptions::default(), &cancel))
    };
    cancel.cancel();
    let report = worker.join().expect("thread panicked").expect("reindex");

    // However far the pass got, every written file is fully present.
    let stats = cairn.stats("midway").expect("stats");
    assert_eq!(stats.files, report.added);
    assert_eq!(stats.entities_by_kind.get("file").copied().unwrap_or(0), report.added);

    let finished = cairn
        .reindex("midway", &ReindexOptions::default(), &CancellationToken::new())
        .expect("reindex");
    assert_eq!(finished.added + report.added, 200);
}

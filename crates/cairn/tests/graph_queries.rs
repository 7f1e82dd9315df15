//! Integration tests for the graph query engine through the public API.
//!
//! Covers impact ordering and limits, dependency-chain depth clamping, C#
//! inheritance and injection edges, and type-level cycle detection.

use std::fs;

use cairn::{Cairn, CancellationToken, Config, Error, RelationshipKind, ReindexOptions};
use rstest::rstest;
use tempfile::TempDir;

/// Create and index a workspace with the given files, registered as `name`.
fn indexed_workspace(
    name: &str,
    files: &[(&str, &str)],
    config: Config,
) -> (TempDir, TempDir, Cairn) {
    let root = tempfile::tempdir().expect("failed to create temp dir");
    for (path, content) in files {
        let full_path = root.path().join(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent dirs");
        }
        fs::write(&full_path, content).expect("failed to write file");
    }
    let data = tempfile::tempdir().expect("failed to create data dir");
    let config = Config {
        data_dir: data.path().to_path_buf(),
        ..config
    };
    let cairn = Cairn::open(config).expect("failed to open Cairn");
    cairn
        .register_workspace(root.path(), Some(name))
        .expect("failed to register workspace");
    let report = cairn
        .reindex(name, &ReindexOptions::default(), &CancellationToken::new())
        .expect("reindex failed");
    assert!(report.errors.is_empty(), "fixture errors: {:?}", report.errors);
    (root, data, cairn)
}

/// `l0 → l1 → … → l5`: each function calls the next.
fn call_chain() -> Vec<(String, String)> {
    (0..6)
        .map(|i| {
            let body = if i < 5 { format!("l{}()", i + 1) } else { "pass".to_string() };
            (format!("l{i}.py"), format!("def l{i}():\n    {body}\n"))
        })
        .collect()
}

fn as_refs(files: &[(String, String)]) -> Vec<(&str, &str)> {
    files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect()
}

// === Impact analysis ===

#[test]
fn impact_is_ordered_by_distance() {
    let files = call_chain();
    let (_root, _data, cairn) = indexed_workspace("chain", &as_refs(&files), Config::default());

    let reports = cairn.impact_analysis("l5", None).expect("impact");
    assert_eq!(reports.len(), 1);
    let distances: Vec<(String, u32)> = reports[0]
        .impacted
        .iter()
        .map(|i| (i.entity.name.clone(), i.distance))
        .collect();
    assert_eq!(
        distances,
        vec![
            ("l4".to_string(), 1),
            ("l3".to_string(), 2),
            ("l2".to_string(), 3),
            ("l1".to_string(), 4),
            ("l0".to_string(), 5),
        ]
    );
    assert!(!reports[0].truncated);
}

#[test]
fn impact_is_capped_by_configured_limit() {
    let files = call_chain();
    let config = Config {
        impact_limit: 2,
        ..Config::default()
    };
    let (_root, _data, cairn) = indexed_workspace("capped", &as_refs(&files), config);

    let reports = cairn.impact_analysis("l5", None).expect("impact");
    assert_eq!(reports[0].impacted.len(), 2);
    assert!(reports[0].truncated);
    assert_eq!(reports[0].impacted[0].entity.name, "l4", "nearest kept first");
}

#[test]
fn unknown_entity_is_not_found() {
    let (_root, _data, cairn) =
        indexed_workspace("empty", &[("a.py", "x = 1\n")], Config::default());

    assert!(matches!(
        cairn.impact_analysis("Nope", None),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        cairn.dependency_chain("Nope", Some(3), None),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        cairn.impact_analysis("l0", Some("no-such-workspace")),
        Err(Error::NotFound(_))
    ));
}

// === Dependency chains ===

#[rstest]
#[case(Some(1), 1)]
#[case(Some(3), 3)]
#[case(Some(0), 1)]
#[case(None, 5)]
fn chain_depth_is_clamped(#[case] depth: Option<u32>, #[case] expected: usize) {
    let files = call_chain();
    let (_root, _data, cairn) = indexed_workspace("deps", &as_refs(&files), Config::default());

    let chains = cairn.dependency_chain("l0", depth, None).expect("chain");
    assert_eq!(chains[0].dependencies.len(), expected);
    assert!(chains[0]
        .dependencies
        .windows(2)
        .all(|w| w[0].depth <= w[1].depth));
}

#[test]
fn chain_depth_never_exceeds_configured_maximum() {
    let files = call_chain();
    let config = Config {
        max_traversal_depth: 2,
        ..Config::default()
    };
    let (_root, _data, cairn) = indexed_workspace("bounded", &as_refs(&files), config);

    let chains = cairn.dependency_chain("l0", Some(50), None).expect("chain");
    assert_eq!(chains[0].dependencies.len(), 2);
}

// === C# relationships ===

#[test]
fn csharp_impact_follows_inheritance_and_injection() {
    let (_root, _data, cairn) = indexed_workspace(
        "dotnet",
        &[
            ("IRepository.cs", "public interface IRepository { void Save(); }\n"),
            (
                "SqlRepository.cs",
                "public class SqlRepository : IRepository { public void Save() {} }\n",
            ),
            (
                "OrderService.cs",
                "public class OrderService {\n    public OrderService(IRepository repo) {}\n}\n",
            ),
        ],
        Config::default(),
    );

    let reports = cairn.impact_analysis("IRepository", None).expect("impact");
    let impacted: Vec<(&str, RelationshipKind)> = reports[0]
        .impacted
        .iter()
        .map(|i| (i.entity.name.as_str(), i.via))
        .collect();
    assert!(impacted.contains(&("SqlRepository", RelationshipKind::Implements)), "{impacted:?}");
    assert!(
        impacted.contains(&("OrderService.OrderService", RelationshipKind::Injects)),
        "{impacted:?}"
    );
}

// === Cycles ===

#[test]
fn detects_type_cycle_through_members() {
    let (_root, _data, cairn) = indexed_workspace(
        "loop",
        &[
            ("a.py", "class A:\n    def to_b(self) -> B:\n        pass\n"),
            ("b.py", "class B:\n    def to_a(self) -> A:\n        pass\n"),
            ("c.py", "class C:\n    def to_a(self) -> A:\n        pass\n"),
        ],
        Config::default(),
    );

    let cycles = cairn.find_circular_dependencies(Some("loop")).expect("cycles");
    assert_eq!(cycles.len(), 1);
    let mut names: Vec<&str> = cycles[0].entities.iter().map(|e| e.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["A", "B"], "C depends on the cycle but is not in it");
}

#[test]
fn acyclic_workspace_has_no_cycles() {
    let files = call_chain();
    let (_root, _data, cairn) = indexed_workspace("dag", &as_refs(&files), Config::default());
    assert!(cairn.find_circular_dependencies(None).expect("cycles").is_empty());
}

// === Direct lookups ===

#[test]
fn callers_and_entity_lookup() {
    let (_root, _data, cairn) = indexed_workspace(
        "calls",
        &[
            ("lib.py", "def shared():\n    pass\n"),
            ("one.py", "def one():\n    shared()\n"),
            ("two.py", "def two():\n    shared()\n"),
        ],
        Config::default(),
    );

    let shared = cairn.find_entities("shared", Some("calls")).expect("find")[0].clone();
    let mut callers: Vec<String> = cairn
        .callers(shared.id)
        .expect("callers")
        .into_iter()
        .map(|e| e.name)
        .collect();
    callers.sort();
    assert_eq!(callers, vec!["one", "two"]);

    let fetched = cairn.get_entity(shared.id).expect("get").expect("exists");
    assert_eq!(fetched, shared);
}

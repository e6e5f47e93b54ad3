use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tempfile::TempDir;
use vaultgraph::properties::parse_value;
use vaultgraph::{
    evaluate, follow_links, graph_analysis, graph_stats, list, parse_expression,
    property_summaries, rename_properties, rename_tags, set_property, tag_hierarchy,
    DocumentStore, FollowOptions, FsStore, GraphOptions, InputExpression, ListInput, ListOptions,
    PathFilter, PropertyOptions,
};

fn vault(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, text) in files {
        write(dir.path(), path, text);
    }
    dir
}

fn write(root: &Path, path: &str, text: &str) {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(full, text).unwrap();
}

fn ids(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_single_link_degrees_and_component() {
    let dir = vault(&[("A.md", "links to [[B]]"), ("B.md", "")]);
    let store = FsStore::new(dir.path());
    let docs = store.list_documents().unwrap();
    let stats = graph_stats(&store, &docs, &GraphOptions::default()).unwrap();

    assert_eq!(stats.nodes["A.md"].outbound, 1);
    assert_eq!(stats.nodes["A.md"].inbound, 0);
    assert_eq!(stats.nodes["B.md"].outbound, 0);
    assert_eq!(stats.nodes["B.md"].inbound, 1);
    assert_eq!(stats.components, vec![ids(&["A.md", "B.md"])]);
    assert!(stats.orphans.is_empty());
}

#[test]
fn test_tag_query_excludes_archived() {
    let dir = vault(&[
        ("X.md", "---\ntags: [work]\n---\nplans\n"),
        ("Y.md", "---\ntags: [work, archived]\n---\nold plans\n"),
    ]);
    let store = FsStore::new(dir.path());

    let split = parse_expression(&["tag:work", "AND", "NOT", "tag:archived"]).unwrap();
    let joined = parse_expression(&["tag:work AND NOT tag:archived"]).unwrap();
    assert_eq!(split, joined);

    let result = list(&store, &split, &ListOptions::default()).unwrap();
    assert_eq!(result.primary, ids(&["X.md"]));
}

#[test]
fn test_hierarchy_counts() {
    let dir = vault(&[
        ("note1.md", "#a/b"),
        ("note2.md", "#a/b"),
        ("note3.md", "#a/c"),
    ]);
    let store = FsStore::new(dir.path());
    let docs = store.list_documents().unwrap();
    let rows = tag_hierarchy(&store, &docs);

    let row = |name: &str| rows.iter().find(|r| r.name == name).unwrap().clone();
    assert_eq!((row("a").individual_count, row("a").aggregate_count), (0, 3));
    assert_eq!((row("a/b").individual_count, row("a/b").aggregate_count), (2, 2));
    assert_eq!((row("a/c").individual_count, row("a/c").aggregate_count), (1, 1));
    // Parent first, larger child before smaller.
    let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["a", "a/b", "a/c"]);
}

#[test]
fn test_sibling_tags_count_parent_once() {
    let dir = vault(&[("x.md", "#a/b and #a/c")]);
    let store = FsStore::new(dir.path());
    let docs = store.list_documents().unwrap();
    let rows = tag_hierarchy(&store, &docs);
    let parent = rows.iter().find(|r| r.name == "a").unwrap();
    assert_eq!(parent.aggregate_count, 1);
}

#[test]
fn test_universal_path_matches_everything() {
    let dir = vault(&[("a.md", ""), ("sub/b.md", ""), ("sub/deep/c.md", "")]);
    let store = FsStore::new(dir.path());
    let docs = store.list_documents().unwrap();
    let all = InputExpression::Leaf(ListInput::PathPrefix { value: "*".into() });
    let found = evaluate(&store, &docs, Some(&all), Default::default());
    assert_eq!(found.into_iter().collect::<Vec<_>>(), docs);
}

#[test]
fn test_follow_depth_is_monotonic_on_cycles() {
    let dir = vault(&[
        ("a.md", "[[b]]"),
        ("b.md", "[[c]]"),
        ("c.md", "[[a]] [[d]]"),
        ("d.md", ""),
    ]);
    let store = FsStore::new(dir.path());
    let docs = store.list_documents().unwrap();
    let seeds = ids(&["a.md"]);

    let reach = |max_depth| {
        let options = FollowOptions {
            max_depth,
            ..Default::default()
        };
        follow_links(&store, &seeds, &docs, &options)
    };

    assert_eq!(reach(Some(0)), seeds.iter().cloned().collect::<BTreeSet<_>>());
    let mut previous = reach(Some(0));
    for depth in 1..5 {
        let current = reach(Some(depth));
        assert!(current.is_superset(&previous));
        previous = current;
    }
    assert_eq!(reach(None).len(), 4);
    assert_eq!(
        reach(Some(2)),
        ["a.md", "b.md", "c.md"].iter().map(|s| s.to_string()).collect::<BTreeSet<_>>()
    );
}

#[test]
fn test_ignore_patterns_hide_documents() {
    let dir = vault(&[
        ("keep.md", "[[templates/t]]"),
        ("templates/t.md", ""),
        (".obsidian/cache.md", ""),
        ("notes.txt", ""),
    ]);
    let store = FsStore::new(dir.path()).with_ignore(PathFilter::new(&["templates/"]).unwrap());
    assert_eq!(store.list_documents().unwrap(), ids(&["keep.md"]));
}

#[test]
fn test_rename_writes_through_to_disk() {
    let dir = vault(&[
        ("a.md", "---\ntags: [project/alpha]\n---\nsee #project/alpha/notes\n"),
        ("b.md", "nothing here\n"),
    ]);
    let store = FsStore::new(dir.path());
    let docs = store.list_documents().unwrap();

    let preview = rename_tags(&store, &docs, &["project"], "work", true).unwrap();
    assert_eq!(preview.files_changed, ids(&["a.md"]));
    assert!(fs::read_to_string(dir.path().join("a.md")).unwrap().contains("project/alpha"));

    let summary = rename_tags(&store, &docs, &["project"], "work", false).unwrap();
    assert_eq!(summary.notes_touched, 1);
    let text = fs::read_to_string(dir.path().join("a.md")).unwrap();
    assert!(text.contains("work/alpha"));
    assert!(text.contains("#work/alpha/notes"));
    assert!(!text.contains("project"));
}

#[test]
fn test_graph_analysis_on_disk() {
    let dir = vault(&[
        ("hub.md", "#topic [[x]] [[y]]"),
        ("x.md", "[[hub]]"),
        ("y.md", "[[hub]]"),
        ("loner.md", "[[loner]]"),
        ("daily/2024-01-01.md", "[[hub]]"),
    ]);
    let store = FsStore::new(dir.path());
    let docs = store.list_documents().unwrap();
    let options = GraphOptions {
        exclude: ids(&["daily"]),
        ..Default::default()
    };
    let analysis = graph_analysis(&store, &docs, &options).unwrap();

    assert_eq!(analysis.node_count, 4);
    assert!(analysis.orphans.is_empty());
    let total: f64 = analysis.nodes.values().map(|n| n.pagerank).sum();
    assert!((total - 1.0).abs() < 1e-6);
    assert_eq!(analysis.strong_components[0], ids(&["hub.md", "x.md", "y.md"]));
    let hub = &analysis.nodes["hub.md"];
    assert!(analysis.nodes.values().all(|n| n.pagerank <= hub.pagerank));
    assert_eq!(hub.inbound, 2);
}

#[test]
fn test_property_summary_and_edits_on_disk() {
    let dir = vault(&[
        ("a.md", "---\nstatus: open\n---\nbody\n"),
        ("b.md", "# B\n"),
        ("c.md", "---\nState: done\n---\n"),
    ]);
    let store = FsStore::new(dir.path());
    let docs = store.list_documents().unwrap();

    let summary = set_property(&store, &docs, "status", parse_value("draft"), false, false).unwrap();
    assert_eq!(summary.files_changed, ids(&["b.md", "c.md"]));
    assert_eq!(
        fs::read_to_string(dir.path().join("b.md")).unwrap(),
        "---\nstatus: draft\n---\n# B\n"
    );

    let summary = rename_properties(&store, &docs, &["status"], "state", true, false).unwrap();
    assert_eq!(summary.notes_touched, 3);
    let text = fs::read_to_string(dir.path().join("c.md")).unwrap();
    assert!(text.contains("State:\n- done\n- draft"));

    let props = property_summaries(&store, &docs, &PropertyOptions::default());
    assert_eq!(props.len(), 1);
    assert_eq!(props[0].name, "state");
    assert_eq!(props[0].note_count, 3);
    assert_eq!(props[0].enum_values, vec!["done", "draft", "open"]);
}

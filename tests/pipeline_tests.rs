//! End-to-end pipeline scenarios
//!
//! Exercises the full driver against scratch projects: initial build and
//! cached rebuild, include-driven partial rebuilds, output repair,
//! cross-document relation repair after re-initialization, ambiguity
//! reporting, and failure isolation with the per-document deferred
//! cache commit.

mod common;

use common::{Project, SPEC_A};
use std::fs;

#[test]
fn initial_build_then_cached_rebuild_is_a_no_op() {
    let project = Project::new(&["docs/spec-a.md"]);
    project.write_doc("docs/spec-a.md", SPEC_A);

    let first = project.build();
    assert!(first.success(), "first build failed: {first:?}");
    assert_eq!(first.built, vec!["spec-a".to_string()]);
    assert!(project.output_path("spec-a").is_file());

    // The diagram artifact landed under its content hash.
    let diagrams: Vec<_> = fs::read_dir(project.root().join("build/diagrams"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "png"))
        .collect();
    assert_eq!(diagrams.len(), 1);

    let cache_before = project.output_cache();
    assert_eq!(cache_before.len(), 1);

    let second = project.build();
    assert!(second.success());
    assert!(second.built.is_empty(), "second build rebuilt: {second:?}");
    assert_eq!(second.cached, vec!["spec-a".to_string()]);

    // Timestamps unchanged: the fresh emit was a no-op.
    assert_eq!(project.output_cache(), cache_before);
}

#[test]
fn changed_include_rebuilds_only_its_root() {
    let project = Project::new(&["docs/spec-a.md", "docs/spec-b.md"]);
    project.write_doc("docs/includes/part.md", "## Shared part\n\nOriginal text.\n");
    project.write_doc(
        "docs/spec-a.md",
        "# SRS: Alpha @SYS-A\n\n```include\nincludes/part.md\n```\n",
    );
    project.write_doc("docs/spec-b.md", "# SRS: Beta @SYS-B\n\n## Overview\n\nStable.\n");

    assert!(project.build().success());
    let cache_before = project.output_cache();

    project.write_doc("docs/includes/part.md", "## Shared part\n\nUpdated text.\n");
    let second = project.build();
    assert!(second.success());
    assert_eq!(second.built, vec!["spec-a".to_string()]);
    assert_eq!(second.cached, vec!["spec-b".to_string()]);

    // A's output carries the updated include text.
    let emitted = fs::read_to_string(project.output_path("spec-a")).unwrap();
    assert!(emitted.contains("Updated text."));

    // B's cache row is untouched; A's has a fresh timestamp.
    let cache_after = project.output_cache();
    let b_before = cache_before.iter().find(|(s, _, _)| s == "spec-b").unwrap();
    let b_after = cache_after.iter().find(|(s, _, _)| s == "spec-b").unwrap();
    assert_eq!(b_before, b_after);
}

#[test]
fn deleted_output_artifact_is_regenerated_alone() {
    let docs = ["docs/a.md", "docs/b.md", "docs/c.md"];
    let project = Project::new(&docs);
    for (i, doc) in docs.iter().enumerate() {
        project.write_doc(
            doc,
            &format!("# SRS: Doc {i} @SYS-{i}\n\n## Overview\n\nBody {i}.\n"),
        );
    }
    assert!(project.build().success());
    let cache_before = project.output_cache();

    fs::remove_file(project.output_path("b")).unwrap();
    let second = project.build();
    assert!(second.success());
    assert_eq!(second.built, vec!["b".to_string()]);
    assert!(project.output_path("b").is_file());

    let cache_after = project.output_cache();
    for spec in ["a", "c"] {
        let before = cache_before.iter().find(|(s, _, _)| s == spec).unwrap();
        let after = cache_after.iter().find(|(s, _, _)| s == spec).unwrap();
        assert_eq!(before, after, "cache row for '{spec}' changed");
    }
}

#[test]
fn cross_document_relation_survives_target_rebuild() {
    let project = Project::new(&["docs/spec-a.md", "docs/spec-b.md"]);
    project.write_doc(
        "docs/spec-a.md",
        "# SRS: Alpha @SYS-A\n\n## HLR: Source of truth @HLR-001\n\nBody.\n",
    );
    project.write_doc(
        "docs/spec-b.md",
        "# SRS: Beta @SYS-B\n\n## LLR: Derived @LLR-001\n\n> refines: [HLR-001](@)\n\nBody.\n",
    );
    assert!(project.build().success());

    let target_before: i64 = {
        let store = project.open_store();
        store
            .query_one(
                "SELECT r.target_object_id FROM spec_relations r
                 JOIN specifications s ON s.id = r.specification_ref
                 WHERE s.identifier = 'spec-b'",
                &[],
                |row| row.get(0),
            )
            .unwrap()
            .unwrap()
    };

    // Rebuild A: HLR-001 is deleted and re-created under a new rowid.
    project.write_doc(
        "docs/spec-a.md",
        "# SRS: Alpha @SYS-A\n\n## HLR: Source of truth @HLR-001\n\nRevised body.\n",
    );
    let second = project.build();
    assert!(second.success());
    assert_eq!(second.built, vec!["spec-a".to_string()]);

    let store = project.open_store();
    let (target_after, type_ref): (i64, String) = store
        .query_one(
            "SELECT r.target_object_id, r.type_ref FROM spec_relations r
             JOIN specifications s ON s.id = r.specification_ref
             WHERE s.identifier = 'spec-b'",
            &[],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap()
        .unwrap();
    assert_ne!(target_before, target_after, "relation should point at the new row");
    assert_eq!(type_ref, "refines");

    let current: i64 = store
        .query_one(
            "SELECT id FROM spec_objects WHERE pid = 'HLR-001'",
            &[],
            |row| row.get(0),
        )
        .unwrap()
        .unwrap();
    assert_eq!(target_after, current);
}

#[test]
fn ambiguous_label_reference_warns_but_builds() {
    let project = Project::new(&["docs/spec-a.md"]);
    // The duplicated label is deliberate here; keep the duplicate-label
    // proof from failing the build so the ambiguity path is what's
    // under test.
    let config_path = project.root().join("speccompiler.toml");
    let mut config = fs::read_to_string(&config_path).unwrap();
    config.push_str("\n[validation]\nfloat_duplicate_label = \"warn\"\n");
    fs::write(&config_path, config).unwrap();
    project.write_doc(
        "docs/spec-a.md",
        "\
# SRS: Alpha @SYS-A

## HLR: First parent @HLR-001

```plantuml:diag{caption=\"One\"}
A -> B
```

## HLR: Second parent @HLR-002

```plantuml:diag{caption=\"Two\"}
B -> C
```

## HLR: Referrer @HLR-003

See [diag](#).
",
    );
    let summary = project.build();
    assert!(summary.success(), "warnings must not fail the build");
    assert!(summary.warn_count >= 1);

    let store = project.open_store();
    let (ambiguous, target): (bool, Option<i64>) = store
        .query_one(
            "SELECT is_ambiguous, target_float_id FROM spec_relations
             WHERE target_text = 'diag'",
            &[],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap()
        .unwrap();
    assert!(ambiguous);
    assert!(target.is_some(), "a deterministic winner is still picked");
}

#[test]
fn failing_include_isolates_the_broken_document() {
    let project = Project::new(&["docs/spec-a.md", "docs/spec-b.md"]);
    project.write_doc("docs/spec-a.md", "# SRS: Alpha @SYS-A\n\n## Overview\n\nFine.\n");
    project.write_doc(
        "docs/spec-b.md",
        "# SRS: Beta @SYS-B\n\n```include\nmissing/part.md\n```\n",
    );

    let first = project.build();
    assert!(!first.success());
    assert_eq!(first.failed, vec!["spec-b".to_string()]);
    assert!(first.built.contains(&"spec-a".to_string()));
    assert!(project.output_path("spec-a").is_file());
    assert!(!project.output_path("spec-b").exists());

    // Fix B: the deferred commit is per-document, so A stays fresh and
    // only B rebuilds.
    project.write_doc("docs/missing/part.md", "## Patched part\n\nNow present.\n");
    let second = project.build();
    assert!(second.success(), "second build failed: {second:?}");
    assert_eq!(second.built, vec!["spec-b".to_string()]);
    assert_eq!(second.cached, vec!["spec-a".to_string()]);
    assert!(project.output_path("spec-b").is_file());
}

#[test]
fn empty_doc_list_runs_no_handlers_and_emits_nothing() {
    let project = Project::new(&[]);
    let summary = project.build();
    assert!(summary.success());
    assert!(summary.built.is_empty());
    assert!(summary.cached.is_empty());
    assert_eq!(summary.error_count, 0);
}

#[test]
fn auto_pids_before_an_insertion_point_are_stable() {
    let project = Project::new(&["docs/spec-a.md"]);
    project.write_doc(
        "docs/spec-a.md",
        "# SRS: Alpha @SYS-A\n\n## HLR: First\n\na\n\n## HLR: Second\n\nb\n",
    );
    assert!(project.build().success());
    let store = project.open_store();
    let pids: Vec<(String, String)> = store
        .query_all(
            "SELECT title_text, pid FROM spec_objects ORDER BY file_seq",
            &[],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(
        pids,
        vec![
            ("First".to_string(), "HLR-001".to_string()),
            ("Second".to_string(), "HLR-002".to_string()),
        ]
    );
    drop(store);

    // Insert a new requirement between the two; the earlier sibling
    // keeps its PID, later auto-PIDs shift.
    project.write_doc(
        "docs/spec-a.md",
        "# SRS: Alpha @SYS-A\n\n## HLR: First\n\na\n\n## HLR: Inserted\n\nx\n\n## HLR: Second\n\nb\n",
    );
    assert!(project.build().success());
    let store = project.open_store();
    let pids: Vec<(String, String)> = store
        .query_all(
            "SELECT title_text, pid FROM spec_objects ORDER BY file_seq",
            &[],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(
        pids,
        vec![
            ("First".to_string(), "HLR-001".to_string()),
            ("Inserted".to_string(), "HLR-002".to_string()),
            ("Second".to_string(), "HLR-003".to_string()),
        ]
    );
}

#[test]
fn file_seq_orders_objects_across_included_files() {
    let project = Project::new(&["docs/spec-a.md"]);
    project.write_doc("docs/includes/tail.md", "## HLR: From include\n\nincluded\n");
    project.write_doc(
        "docs/spec-a.md",
        "# SRS: Alpha @SYS-A\n\n## HLR: Inline first\n\nbody\n\n```include\nincludes/tail.md\n```\n",
    );
    assert!(project.build().success());

    let store = project.open_store();
    let rows: Vec<(String, String)> = store
        .query_all(
            "SELECT title_text, from_file FROM spec_objects ORDER BY file_seq",
            &[],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, "Inline first");
    assert!(rows[0].1.ends_with("spec-a.md"));
    assert_eq!(rows[1].0, "From include");
    assert!(rows[1].1.ends_with("tail.md"));
}

#[test]
fn forced_build_rebuilds_fresh_documents() {
    let project = Project::new(&["docs/spec-a.md"]);
    project.write_doc("docs/spec-a.md", SPEC_A);
    assert!(project.build().success());

    let forced = project.build_with(true);
    assert!(forced.success());
    assert_eq!(forced.built, vec!["spec-a".to_string()]);
    assert!(forced.cached.is_empty());
}

//! Shared fixtures for the end-to-end pipeline tests
#![allow(dead_code)]

use speccompiler_config::Config;
use speccompiler_engine::{BuildSummary, Driver};
use speccompiler_store::Store;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scratch project with config, docs and a model overlay whose
/// "renderer" is plain `cp`, so tests never need real external tools.
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new(doc_files: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let docs: Vec<String> = doc_files.iter().map(|f| format!("\"{f}\"")).collect();
        let config = format!(
            r#"
            project.code = "SC"
            project.name = "Test project"

            doc_files = [{}]

            [[outputs]]
            format = "json"
            path = "{{spec_id}}.json"
            "#,
            docs.join(", ")
        );
        fs::write(dir.path().join("speccompiler.toml"), config).unwrap();

        let model_dir = dir.path().join("model/types");
        fs::create_dir_all(&model_dir).unwrap();
        fs::write(
            model_dir.join("floats.toml"),
            r#"
            [[floats]]
            identifier = "plantuml"
            caption_format = "Figure"
            counter_group = "figure"
            aliases = ["puml", "uml"]
            needs_external_render = true
            render_command = ["cp"]
            render_timeout_secs = 10
            output_ext = "png"
            source_ext = "puml"
            "#,
        )
        .unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Point the external writer at a different program. Inserted before
    /// the table sections so the key stays top-level.
    pub fn set_writer(&self, program: &str) {
        let path = self.root().join("speccompiler.toml");
        let config = fs::read_to_string(&path).unwrap();
        let config = config.replace(
            "doc_files",
            &format!("writer = \"{program}\"\n            doc_files"),
        );
        fs::write(path, config).unwrap();
    }

    /// Declare an additional output format.
    pub fn add_output(&self, format: &str, path_template: &str) {
        let path = self.root().join("speccompiler.toml");
        let mut config = fs::read_to_string(&path).unwrap();
        config.push_str(&format!(
            "\n[[outputs]]\nformat = \"{format}\"\npath = \"{path_template}\"\n"
        ));
        fs::write(path, config).unwrap();
    }

    pub fn write_doc(&self, rel: &str, contents: &str) {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    pub fn build(&self) -> BuildSummary {
        self.build_with(false)
    }

    pub fn build_with(&self, force: bool) -> BuildSummary {
        let config = Config::load(&self.root().join("speccompiler.toml")).unwrap();
        let root = self.root().canonicalize().unwrap();
        Driver::new(root, config, force).run().unwrap()
    }

    pub fn output_path(&self, spec_id: &str) -> PathBuf {
        self.root().join("build").join(format!("{spec_id}.json"))
    }

    pub fn open_store(&self) -> Store {
        Store::open(&self.root().join("build/specir.db")).unwrap()
    }

    pub fn output_cache(&self) -> Vec<(String, String, String)> {
        let store = self.open_store();
        store
            .query_all(
                "SELECT spec_id, output_path, generated_at FROM output_cache
                 ORDER BY spec_id, output_path",
                &[],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap()
    }
}

/// A minimal document with one requirement and one diagram float.
pub const SPEC_A: &str = "\
# SRS: System Alpha @SYS-A

## HLR: Ingest telemetry @HLR-001

> status: draft

Ingestion requirement body.

```plantuml:diag{caption=\"Data flow\"}
A -> B
```
";

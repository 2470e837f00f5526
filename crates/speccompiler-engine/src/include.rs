//! Include expansion
//!
//! Before parsing, fenced `include` directives are expanded recursively.
//! Each directive body lists file paths, one per line, resolved relative
//! to the including file; `#` lines are comments. Every visited node is
//! recorded with its content hash for the build graph, and a line map from
//! expanded lines back to `(file, original line)` keeps diagnostics and
//! SPEC-IR rows attributed to the file the author actually wrote.

use speccompiler_utils::hash::sha1_str;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Maximum include nesting depth.
pub const MAX_INCLUDE_DEPTH: usize = 100;

/// Include expansion errors. All are hard errors for the owning document.
#[derive(Error, Debug)]
pub enum IncludeError {
    #[error("Include file not found: {path} (included from {from}:{line})")]
    Missing {
        path: String,
        from: String,
        line: u32,
    },

    #[error("Include cycle detected: {}", cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    #[error("Include depth limit ({limit}) exceeded at {from}:{line}")]
    DepthExceeded {
        limit: usize,
        from: String,
        line: u32,
    },

    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },
}

/// One build-graph node visited during expansion (root included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeNode {
    pub path: PathBuf,
    pub sha1: String,
}

/// Result of include expansion.
#[derive(Debug, Clone)]
pub struct ExpandedSource {
    /// The fully expanded Markdown text
    pub text: String,
    /// For each expanded line (0-based index = line - 1): source file and
    /// 1-based line in that file
    pub line_map: Vec<(PathBuf, u32)>,
    /// Every file visited, root first, in visit order
    pub nodes: Vec<IncludeNode>,
}

impl ExpandedSource {
    /// Map an expanded 1-based line back to `(file, line)`.
    #[must_use]
    pub fn origin(&self, expanded_line: u32) -> Option<(&Path, u32)> {
        self.line_map
            .get(expanded_line.saturating_sub(1) as usize)
            .map(|(path, line)| (path.as_path(), *line))
    }
}

/// Expand `root` and all transitive includes.
pub fn expand_includes(root: &Path) -> Result<ExpandedSource, IncludeError> {
    let mut out = ExpandedSource {
        text: String::new(),
        line_map: Vec::new(),
        nodes: Vec::new(),
    };
    let mut stack = Vec::new();
    expand_file(root, 0, &mut stack, &mut out)?;
    Ok(out)
}

fn expand_file(
    path: &Path,
    depth: usize,
    stack: &mut Vec<PathBuf>,
    out: &mut ExpandedSource,
) -> Result<(), IncludeError> {
    let canonical = fs::canonicalize(path).map_err(|e| IncludeError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    if stack.contains(&canonical) {
        let mut cycle: Vec<String> = stack.iter().map(|p| p.display().to_string()).collect();
        cycle.push(canonical.display().to_string());
        return Err(IncludeError::Cycle { cycle });
    }

    let contents = fs::read_to_string(path).map_err(|e| IncludeError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    out.nodes.push(IncludeNode {
        path: path.to_path_buf(),
        sha1: sha1_str(&contents),
    });
    stack.push(canonical);

    let result = expand_lines(path, &contents, depth, stack, out);
    stack.pop();
    result
}

fn expand_lines(
    path: &Path,
    contents: &str,
    depth: usize,
    stack: &mut Vec<PathBuf>,
    out: &mut ExpandedSource,
) -> Result<(), IncludeError> {
    let lines: Vec<&str> = contents.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if is_include_fence_open(line) {
            let open_line = (i + 1) as u32;
            i += 1;
            while i < lines.len() && !is_fence_close(lines[i]) {
                let entry = lines[i].trim();
                let entry_line = (i + 1) as u32;
                i += 1;
                if entry.is_empty() || entry.starts_with('#') {
                    continue;
                }
                let target = path
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(entry);
                if !target.is_file() {
                    return Err(IncludeError::Missing {
                        path: target.display().to_string(),
                        from: path.display().to_string(),
                        line: entry_line,
                    });
                }
                if depth + 1 > MAX_INCLUDE_DEPTH {
                    return Err(IncludeError::DepthExceeded {
                        limit: MAX_INCLUDE_DEPTH,
                        from: path.display().to_string(),
                        line: open_line,
                    });
                }
                expand_file(&target, depth + 1, stack, out)?;
                // Blank separator keeps the included tail and following
                // content in distinct Markdown blocks.
                push_line(out, "", path, entry_line);
            }
            // Skip the closing fence.
            i += 1;
        } else {
            push_line(out, line, path, (i + 1) as u32);
            i += 1;
        }
    }
    Ok(())
}

fn push_line(out: &mut ExpandedSource, line: &str, file: &Path, source_line: u32) {
    out.text.push_str(line);
    out.text.push('\n');
    out.line_map.push((file.to_path_buf(), source_line));
}

fn is_include_fence_open(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed
        .strip_prefix("```")
        .is_some_and(|info| info.trim() == "include")
}

fn is_fence_close(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed == "```"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn expands_nested_includes_with_line_map() {
        let dir = TempDir::new().unwrap();
        write(&dir, "includes/part.md", "included text\n");
        let root = write(
            &dir,
            "root.md",
            "# Title\n\n```include\nincludes/part.md\n```\n\ntail\n",
        );

        let expanded = expand_includes(&root).unwrap();
        assert!(expanded.text.contains("included text"));
        assert!(expanded.text.contains("tail"));
        assert_eq!(expanded.nodes.len(), 2);
        assert_eq!(expanded.nodes[0].path, root);

        // Line 3 of the expanded text is the first included line.
        let included_at = expanded
            .text
            .lines()
            .position(|l| l == "included text")
            .unwrap() as u32
            + 1;
        let (file, line) = expanded.origin(included_at).unwrap();
        assert!(file.ends_with("includes/part.md"));
        assert_eq!(line, 1);
    }

    #[test]
    fn comment_and_blank_entries_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(&dir, "part.md", "body\n");
        let root = write(
            &dir,
            "root.md",
            "```include\n# a comment\n\npart.md\n```\n",
        );
        let expanded = expand_includes(&root).unwrap();
        assert!(expanded.text.contains("body"));
        assert_eq!(expanded.nodes.len(), 2);
    }

    #[test]
    fn missing_include_names_the_site() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "root.md", "```include\nnope.md\n```\n");
        let err = expand_includes(&root).unwrap_err();
        match err {
            IncludeError::Missing { path, from, line } => {
                assert!(path.ends_with("nope.md"));
                assert!(from.ends_with("root.md"));
                assert_eq!(line, 2);
            }
            other => panic!("expected Missing, got {other}"),
        }
    }

    #[test]
    fn cycle_reports_full_path() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.md", "```include\nb.md\n```\n");
        write(&dir, "b.md", "```include\na.md\n```\n");
        let err = expand_includes(&dir.path().join("a.md")).unwrap_err();
        match err {
            IncludeError::Cycle { cycle } => {
                assert!(cycle.len() >= 3);
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected Cycle, got {other}"),
        }
    }

    #[test]
    fn depth_at_limit_passes_and_limit_plus_one_fails() {
        let dir = TempDir::new().unwrap();
        // Chain of exactly MAX_INCLUDE_DEPTH includes below the root.
        let deepest = MAX_INCLUDE_DEPTH;
        write(&dir, &format!("f{deepest}.md"), "leaf\n");
        for i in (1..deepest).rev() {
            write(
                &dir,
                &format!("f{i}.md"),
                &format!("```include\nf{}.md\n```\n", i + 1),
            );
        }
        let root = write(&dir, "root.md", "```include\nf1.md\n```\n");
        let expanded = expand_includes(&root).unwrap();
        assert!(expanded.text.contains("leaf"));

        // One more level exceeds the limit.
        write(&dir, &format!("f{deepest}.md"), "```include\nleaf.md\n```\n");
        write(&dir, "leaf.md", "too deep\n");
        let err = expand_includes(&root).unwrap_err();
        assert!(matches!(err, IncludeError::DepthExceeded { .. }));
    }
}

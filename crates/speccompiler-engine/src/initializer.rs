//! INITIALIZE: populate SPEC-IR from the parsed document
//!
//! On a dirty specification the initializer deletes the specification's
//! previous content rows, then walks the include-expanded AST in source
//! order, maintaining one monotone `file_seq` counter across every record
//! it emits. Headings become the specification and its objects, attribute
//! block-quotes become typed EAV rows, float and view fences become their
//! own rows (removed from the owning object's stored AST), and every link
//! whose target is a registered selector is harvested as an unresolved
//! relation.

use crate::include::ExpandedSource;
use crate::syntax;
use anyhow::{Context as _, Result, anyhow};
use chrono::NaiveDate;
use speccompiler_doc::{Block, Document, Inline, ast::encode_blocks, walk_inlines};
use speccompiler_model::{Datatype, TypeRegistry, format_pid};
use speccompiler_phase_api::{Context, Diagnostics};
use speccompiler_store::Store;
use speccompiler_utils::hash::sha1_str;
use speccompiler_utils::slug::slugify;
use std::collections::BTreeSet;
use std::path::Path;

struct PendingAttr {
    key: String,
    value: String,
    ast_json: String,
    line: u32,
}

struct PendingObject {
    file_seq: i64,
    level: u8,
    type_ref: String,
    is_composite: bool,
    pid_prefix: Option<String>,
    pid_format: Option<String>,
    title: String,
    authored_pid: Option<String>,
    pid: String,
    pid_sequence: Option<u32>,
    pid_auto: bool,
    label: String,
    start_line: u32,
    end_line: u32,
    blocks: Vec<Block>,
    attrs: Vec<PendingAttr>,
    rowid: i64,
}

struct PendingFloat {
    file_seq: i64,
    type_ref: String,
    label: String,
    caption: Option<String>,
    raw_content: String,
    syntax_key: Option<String>,
    attributes: Vec<(String, String)>,
    line: u32,
}

struct PendingView {
    file_seq: i64,
    type_ref: String,
    is_inline: bool,
    raw_content: String,
    line: u32,
}

struct SpecParts {
    type_ref: String,
    title: String,
    pid: String,
}

/// Initialize one dirty document. Runs inside the caller's transaction.
pub fn initialize_document(
    store: &Store,
    registry: &TypeRegistry,
    expanded: &ExpandedSource,
    ctx: &mut Context,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let doc = ctx
        .doc
        .clone()
        .ok_or_else(|| anyhow!("initializer invoked on a context without a document"))?;

    let spec_rowid = reset_specification(store, &ctx.spec_id, &ctx.source_path)?;
    ctx.spec_rowid = spec_rowid;

    let mut walker = Walker::new(registry, expanded, &doc, ctx);
    walker.walk(diagnostics)?;
    walker.assign_pids();
    walker.persist(store, spec_rowid)?;
    Ok(())
}

/// Delete a specification's content rows, keeping (or creating) the
/// specification row itself so cross-document relation sources survive.
fn reset_specification(store: &Store, spec_id: &str, root_path: &Path) -> Result<i64> {
    let existing: Option<i64> = store.query_one(
        "SELECT id FROM specifications WHERE identifier = ?1",
        &[&spec_id],
        |row| row.get(0),
    )?;
    let rowid = match existing {
        Some(id) => {
            store.execute(
                "DELETE FROM attribute_values WHERE object_ref IN
                    (SELECT id FROM spec_objects WHERE specification_ref = ?1)
                 OR float_ref IN
                    (SELECT id FROM spec_floats WHERE specification_ref = ?1)
                 OR spec_ref = ?1",
                &[&id],
            )?;
            store.execute(
                "DELETE FROM spec_objects WHERE specification_ref = ?1",
                &[&id],
            )?;
            store.execute(
                "DELETE FROM spec_floats WHERE specification_ref = ?1",
                &[&id],
            )?;
            store.execute("DELETE FROM spec_views WHERE specification_ref = ?1", &[&id])?;
            store.execute(
                "DELETE FROM spec_relations WHERE specification_ref = ?1",
                &[&id],
            )?;
            store.execute(
                "UPDATE specifications SET root_path = ?2 WHERE id = ?1",
                &[&id, &root_path.display().to_string()],
            )?;
            id
        }
        None => {
            store.execute(
                "INSERT INTO specifications(identifier, root_path) VALUES(?1, ?2)",
                &[&spec_id, &root_path.display().to_string()],
            )?;
            store.last_insert_rowid()
        }
    };
    Ok(rowid)
}

struct Walker<'a> {
    registry: &'a TypeRegistry,
    expanded: &'a ExpandedSource,
    doc: &'a Document,
    ctx: &'a mut Context,
    spec: Option<SpecParts>,
    preamble: Vec<Block>,
    spec_attrs: Vec<PendingAttr>,
    objects: Vec<PendingObject>,
    floats: Vec<PendingFloat>,
    views: Vec<PendingView>,
    explicit_pids: BTreeSet<String>,
}

/// Split a paragraph's top-level inlines into per-line groups at soft
/// and hard breaks.
fn split_top_level_lines(inlines: &[Inline]) -> Vec<Vec<Inline>> {
    let mut groups: Vec<Vec<Inline>> = vec![Vec::new()];
    for inline in inlines {
        match inline {
            Inline::SoftBreak | Inline::LineBreak => groups.push(Vec::new()),
            other => {
                if let Some(last) = groups.last_mut() {
                    last.push(other.clone());
                }
            }
        }
    }
    groups
}

impl<'a> Walker<'a> {
    fn new(
        registry: &'a TypeRegistry,
        expanded: &'a ExpandedSource,
        doc: &'a Document,
        ctx: &'a mut Context,
    ) -> Self {
        // Authored PIDs are collected up front so auto-assignment never
        // collides with a PID declared later in the document.
        let mut explicit_pids = BTreeSet::new();
        for block in &doc.blocks {
            if let Block::Header { level, inlines, .. } = block {
                if *level >= 2 {
                    let text = speccompiler_doc::stringify_inlines(inlines);
                    if let Some(pid) = syntax::parse_heading(&text).pid {
                        explicit_pids.insert(pid);
                    }
                }
            }
        }
        Self {
            registry,
            expanded,
            doc,
            ctx,
            spec: None,
            preamble: Vec::new(),
            spec_attrs: Vec::new(),
            objects: Vec::new(),
            floats: Vec::new(),
            views: Vec::new(),
            explicit_pids,
        }
    }

    fn origin(&self, expanded_line: u32) -> (String, u32) {
        self.expanded.origin(expanded_line).map_or_else(
            || (self.ctx.source_path.display().to_string(), expanded_line),
            |(file, line)| (file.display().to_string(), line),
        )
    }

    fn walk(&mut self, diagnostics: &mut Diagnostics) -> Result<()> {
        let doc = self.doc;
        for block in &doc.blocks {
            match block {
                Block::Header {
                    level: 1,
                    inlines,
                    line: _,
                } if self.spec.is_none() => {
                    let text = speccompiler_doc::stringify_inlines(inlines);
                    self.spec = Some(self.parse_spec_header(&text));
                }
                Block::Header {
                    level,
                    inlines,
                    line,
                } if *level >= 2 => {
                    self.close_open_objects(line.saturating_sub(1), *level);
                    let text = speccompiler_doc::stringify_inlines(inlines);
                    self.open_object(&text, *level, *line)?;
                }
                Block::CodeBlock { info, text, line } => {
                    self.handle_code_block(info, text, *line);
                }
                Block::BlockQuote { blocks, line } => {
                    if !self.try_attribute(blocks, *line) {
                        self.push_body(block.clone());
                    }
                }
                other => {
                    self.push_body(other.clone());
                }
            }
        }
        self.close_open_objects(doc.line_count, 2);

        if self.spec.is_none() {
            let (file, _) = self.origin(1);
            diagnostics.report(
                "spec_missing_required",
                format!("document '{}' has no level-1 specification heading", self.ctx.spec_id),
                Some(&file),
                Some(1),
            );
        }
        Ok(())
    }

    fn parse_spec_header(&self, text: &str) -> SpecParts {
        let parts = syntax::parse_heading(text);
        let (type_ref, title) = match parts
            .type_name
            .as_deref()
            .and_then(|name| self.registry.resolve_specification(name))
        {
            Some(def) => (def.identifier.clone(), parts.title.clone()),
            None => {
                let type_ref = self
                    .registry
                    .default_specification_type()
                    .map(|def| def.identifier.clone())
                    .unwrap_or_else(|| "document".to_string());
                let title = match &parts.type_name {
                    Some(prefix) => format!("{prefix}: {}", parts.title),
                    None => parts.title.clone(),
                };
                (type_ref, title)
            }
        };
        SpecParts {
            type_ref,
            title,
            pid: parts.pid.unwrap_or_else(|| self.ctx.spec_id.clone()),
        }
    }

    fn open_object(&mut self, text: &str, level: u8, line: u32) -> Result<()> {
        let parts = syntax::parse_heading(text);
        let (type_def, title) = match parts
            .type_name
            .as_deref()
            .and_then(|name| self.registry.resolve_object(name))
        {
            Some(def) => (def, parts.title.clone()),
            None => {
                let title = match &parts.type_name {
                    Some(prefix) => format!("{prefix}: {}", parts.title),
                    None => parts.title.clone(),
                };
                let def = self
                    .registry
                    .resolve_object_implicit(&title)
                    .or_else(|| self.registry.default_object_type())
                    .ok_or_else(|| anyhow!("model defines no default object type"))?;
                (def, title)
            }
        };

        let label = if type_def.is_composite {
            format!("section:{}", slugify(&title))
        } else {
            slugify(&title)
        };

        let file_seq = self.ctx.next_file_seq();
        let mut object = PendingObject {
            file_seq,
            level,
            type_ref: type_def.identifier.clone(),
            is_composite: type_def.is_composite,
            pid_prefix: type_def.pid_prefix.clone(),
            pid_format: type_def.pid_format.clone(),
            title,
            authored_pid: parts.pid.clone(),
            pid: parts.pid.unwrap_or_default(),
            pid_sequence: None,
            pid_auto: false,
            label,
            start_line: line,
            end_line: self.doc.line_count,
            blocks: Vec::new(),
            attrs: Vec::new(),
            rowid: 0,
        };
        // The heading itself leads the object's stored AST.
        object.blocks.push(Block::Header {
            level,
            inlines: vec![Inline::str(object.title.clone())],
            line,
        });
        self.objects.push(object);
        Ok(())
    }

    /// A heading at `min_level` closes every still-open object at that
    /// level or deeper. Open objects carry the document line count as a
    /// sentinel end; shallower objects stay open across the new heading.
    fn close_open_objects(&mut self, end_line: u32, min_level: u8) {
        let sentinel = self.doc.line_count;
        for object in self.objects.iter_mut() {
            if object.end_line == sentinel && object.level >= min_level {
                object.end_line = end_line.max(object.start_line);
            }
        }
    }

    fn handle_code_block(&mut self, info: &str, text: &str, line: u32) {
        let trimmed = info.trim();
        if trimmed == "include" {
            return;
        }
        if let Some(view_type) = self.registry.resolve_view_prefix(trimmed) {
            let file_seq = self.ctx.next_file_seq();
            self.views.push(PendingView {
                file_seq,
                type_ref: view_type.identifier.clone(),
                is_inline: false,
                raw_content: text.to_string(),
                line,
            });
            return;
        }
        if let Some(float_info) = syntax::parse_float_info(trimmed) {
            if let Some(float_type) = self.registry.resolve_float(&float_info.type_name) {
                let caption = float_info
                    .attributes
                    .iter()
                    .find(|(k, _)| k == "caption")
                    .map(|(_, v)| v.clone());
                let file_seq = self.ctx.next_file_seq();
                self.floats.push(PendingFloat {
                    file_seq,
                    type_ref: float_type.identifier.clone(),
                    label: float_info.label,
                    caption,
                    raw_content: text.to_string(),
                    syntax_key: float_info.lang,
                    attributes: float_info.attributes,
                    line,
                });
                return;
            }
        }
        // Plain fenced code stays in the owning object's prose.
        self.push_body(Block::CodeBlock {
            info: info.to_string(),
            text: text.to_string(),
            line,
        });
    }

    fn push_body(&mut self, block: Block) {
        self.register_inline_views(&block);
        match self.objects.last_mut() {
            Some(object) => object.blocks.push(block),
            None => self.preamble.push(block),
        }
    }

    fn register_inline_views(&mut self, block: &Block) {
        let mut codes = Vec::new();
        walk_inlines(std::slice::from_ref(block), &mut |inline| {
            if let Inline::Code { text } = inline {
                codes.push(text.clone());
            }
        });
        let line = block_line(block).unwrap_or(0);
        for code in codes {
            let Some(view) = syntax::parse_inline_view(&code) else {
                continue;
            };
            let Some(view_type) = self.registry.resolve_view_prefix(&view.prefix) else {
                continue;
            };
            let file_seq = self.ctx.next_file_seq();
            self.views.push(PendingView {
                file_seq,
                type_ref: view_type.identifier.clone(),
                is_inline: true,
                raw_content: code,
                line,
            });
        }
    }

    /// Parse an attribute block-quote. Every line matching `key: value`
    /// starts a new attribute; lines that do not match append to the
    /// previous one, as do further paragraphs in the same quote. A quote
    /// whose first line is not an attribute line is prose.
    fn try_attribute(&mut self, blocks: &[Block], line: u32) -> bool {
        let Some(Block::Para { inlines, .. }) = blocks.first() else {
            return false;
        };
        let groups = split_top_level_lines(inlines);
        let first_text = groups
            .first()
            .map(|g| speccompiler_doc::stringify_inlines(g))
            .unwrap_or_default();
        if syntax::parse_attribute_line(&first_text).is_none() {
            return false;
        }

        let mut attrs: Vec<(PendingAttr, Vec<Vec<Inline>>)> = Vec::new();
        for group in groups {
            let text = speccompiler_doc::stringify_inlines(&group);
            if let Some(parsed) = syntax::parse_attribute_line(&text) {
                attrs.push((
                    PendingAttr {
                        key: parsed.key,
                        value: parsed.value,
                        ast_json: String::new(),
                        line,
                    },
                    vec![group],
                ));
            } else if let Some((attr, lines)) = attrs.last_mut() {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    if !attr.value.is_empty() {
                        attr.value.push('\n');
                    }
                    attr.value.push_str(trimmed);
                }
                lines.push(group);
            }
        }

        // Further paragraphs in the quote append to the last attribute.
        let mut extra_blocks: Vec<Block> = Vec::new();
        if let Some((attr, _)) = attrs.last_mut() {
            for block in blocks.iter().skip(1) {
                let extra = speccompiler_doc::stringify_blocks(std::slice::from_ref(block));
                let trimmed = extra.trim();
                if !trimmed.is_empty() {
                    if !attr.value.is_empty() {
                        attr.value.push('\n');
                    }
                    attr.value.push_str(trimmed);
                }
                extra_blocks.push(block.clone());
            }
        }

        let last = attrs.len().saturating_sub(1);
        let finalized: Vec<PendingAttr> = attrs
            .into_iter()
            .enumerate()
            .map(|(i, (mut attr, lines))| {
                let mut para_inlines: Vec<Inline> = Vec::new();
                for (j, group) in lines.into_iter().enumerate() {
                    if j > 0 {
                        para_inlines.push(Inline::SoftBreak);
                    }
                    para_inlines.extend(group);
                }
                let mut ast_blocks = vec![Block::Para {
                    inlines: para_inlines,
                    line,
                }];
                if i == last {
                    ast_blocks.extend(extra_blocks.iter().cloned());
                }
                attr.ast_json =
                    encode_blocks(&ast_blocks).unwrap_or_else(|_| "[]".to_string());
                attr
            })
            .collect();

        match self.objects.last_mut() {
            Some(object) => object.attrs.extend(finalized),
            // Preamble attributes attach to the specification itself.
            None => self.spec_attrs.extend(finalized),
        }
        true
    }

    /// Auto-PID synthesis (§ idempotent by construction: authored PIDs are
    /// pre-collected and counters advance deterministically in file order).
    fn assign_pids(&mut self) {
        let spec_pid = self
            .spec
            .as_ref()
            .map_or_else(|| self.ctx.spec_id.clone(), |s| s.pid.clone());

        let mut used: BTreeSet<String> = self.explicit_pids.clone();
        let mut counters: std::collections::BTreeMap<String, u32> = std::collections::BTreeMap::new();
        let mut section_counters: Vec<u32> = Vec::new();

        for object in &mut self.objects {
            if let Some(authored) = &object.authored_pid {
                object.pid = authored.clone();
                if object.is_composite {
                    advance_section_counters(&mut section_counters, object.level);
                }
                continue;
            }
            if object.is_composite {
                advance_section_counters(&mut section_counters, object.level);
                let dotted: Vec<String> =
                    section_counters.iter().map(ToString::to_string).collect();
                object.pid = format!("{spec_pid}-sec{}", dotted.join("."));
                object.pid_auto = true;
                continue;
            }
            if let (Some(prefix), Some(format)) = (&object.pid_prefix, &object.pid_format) {
                let counter = counters.entry(object.type_ref.clone()).or_insert(0);
                loop {
                    *counter += 1;
                    let candidate = format_pid(format, prefix, *counter);
                    if used.insert(candidate.clone()) {
                        object.pid = candidate;
                        object.pid_sequence = Some(*counter);
                        object.pid_auto = true;
                        break;
                    }
                }
            } else {
                // No prefix declared: the label doubles as the PID.
                object.pid = format!("{spec_pid}:{}", object.label);
                object.pid_auto = true;
            }
        }
    }

    fn persist(&mut self, store: &Store, spec_rowid: i64) -> Result<()> {
        let spec = self.spec.as_ref();
        let preamble_json = encode_blocks(&self.preamble)?;
        store.execute(
            "UPDATE specifications
             SET long_name = ?2, type_ref = ?3, pid = ?4, body_ast = ?5, header_ast = NULL
             WHERE id = ?1",
            &[
                &spec_rowid,
                &spec.map(|s| s.title.clone()),
                &spec.map(|s| s.type_ref.clone()),
                &spec.map(|s| s.pid.clone()),
                &preamble_json,
            ],
        )?;

        // Preamble attributes belong to the specification. They have no
        // declared types, so they store as strings.
        for attr in &self.spec_attrs {
            let (file, line) = self.origin(attr.line);
            store.execute(
                "INSERT INTO attribute_values(spec_ref, name, raw_value, datatype,
                    string_value, ast, from_file, line)
                 VALUES(?1, ?2, ?3, 'STRING', ?3, ?4, ?5, ?6)",
                &[
                    &spec_rowid,
                    &attr.key,
                    &attr.value,
                    &attr.ast_json,
                    &file,
                    &i64::from(line),
                ],
            )?;
        }

        for i in 0..self.objects.len() {
            let ast_json = encode_blocks(&self.objects[i].blocks)?;
            let object = &self.objects[i];
            let (from_file, start_line) = self.origin(object.start_line);
            store.execute(
                "INSERT INTO spec_objects(content_sha, specification_ref, type_ref, from_file,
                    file_seq, pid, pid_prefix, pid_sequence, pid_auto_generated, title_text,
                    label, level, start_line, end_line, ast)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                &[
                    &sha1_str(&ast_json),
                    &spec_rowid,
                    &object.type_ref,
                    &from_file,
                    &object.file_seq,
                    &object.pid,
                    &object.pid_prefix,
                    &object.pid_sequence.map(i64::from),
                    &object.pid_auto,
                    &object.title,
                    &object.label,
                    &i64::from(object.level),
                    &i64::from(start_line),
                    &i64::from(object.end_line),
                    &ast_json,
                ],
            )?;
            self.objects[i].rowid = store.last_insert_rowid();
        }

        for object in &self.objects {
            for attr in &object.attrs {
                self.persist_attribute(store, object.rowid, &object.type_ref, attr)?;
            }
        }

        for float in &self.floats {
            let parent = self.parent_object_for(float.line);
            let (from_file, line) = self.origin(float.line);
            let pandoc_attributes = serde_json::to_string(&float.attributes)?;
            let anchor = if float.label.is_empty() {
                None
            } else {
                Some(float.label.clone())
            };
            store.execute(
                "INSERT INTO spec_floats(content_sha, specification_ref, type_ref, from_file,
                    file_seq, start_line, label, anchor, caption, raw_content, raw_ast,
                    parent_object_id, pandoc_attributes, syntax_key)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11, ?12, ?13)",
                &[
                    &sha1_str(float.raw_content.trim()),
                    &spec_rowid,
                    &float.type_ref,
                    &from_file,
                    &float.file_seq,
                    &i64::from(line),
                    &float.label,
                    &anchor,
                    &float.caption,
                    &float.raw_content,
                    &parent,
                    &pandoc_attributes,
                    &float.syntax_key,
                ],
            )?;
        }

        for view in &self.views {
            let parent = self.parent_object_for(view.line);
            let (from_file, line) = self.origin(view.line);
            store.execute(
                "INSERT INTO spec_views(content_sha, specification_ref, type_ref, from_file,
                    file_seq, start_line, label, raw_content, raw_ast, parent_object_id,
                    is_inline)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?7, ?8, ?9)",
                &[
                    &sha1_str(view.raw_content.trim()),
                    &spec_rowid,
                    &view.type_ref,
                    &from_file,
                    &view.file_seq,
                    &i64::from(line),
                    &view.raw_content,
                    &parent,
                    &view.is_inline,
                ],
            )?;
        }

        self.harvest_relations(store, spec_rowid)?;
        Ok(())
    }

    fn persist_attribute(
        &self,
        store: &Store,
        object_rowid: i64,
        type_ref: &str,
        attr: &PendingAttr,
    ) -> Result<()> {
        let declared = self
            .registry
            .object_type(type_ref)
            .and_then(|def| def.attributes.iter().find(|a| a.name == attr.key));
        let datatype = declared.map_or(Datatype::String, |d| d.datatype);
        let (min_value, max_value) =
            declared.map_or((None, None), |d| (d.min_value, d.max_value));
        let (file, line) = self.origin(attr.line);

        let mut string_value: Option<String> = None;
        let mut int_value: Option<i64> = None;
        let mut real_value: Option<f64> = None;
        let mut bool_value: Option<bool> = None;
        let mut date_value: Option<String> = None;
        let mut enum_ref: Option<String> = None;
        let mut ast: Option<String> = None;
        let mut xhtml_value: Option<String> = None;
        let mut cast_error: Option<String> = None;
        let mut cast_error_kind: Option<String> = None;

        match datatype {
            Datatype::String => string_value = Some(attr.value.clone()),
            Datatype::Integer => match attr.value.trim().parse::<i64>() {
                Ok(v) => {
                    if min_value.is_some_and(|min| (v as f64) < min)
                        || max_value.is_some_and(|max| (v as f64) > max)
                    {
                        cast_error = Some(format!("value {v} outside declared bounds"));
                        cast_error_kind = Some("bounds".to_string());
                    } else {
                        int_value = Some(v);
                    }
                }
                Err(_) => {
                    cast_error = Some(format!("'{}' is not an integer", attr.value));
                    cast_error_kind = Some("cast".to_string());
                }
            },
            Datatype::Real => match attr.value.trim().parse::<f64>() {
                Ok(v) => {
                    if min_value.is_some_and(|min| v < min)
                        || max_value.is_some_and(|max| v > max)
                    {
                        cast_error = Some(format!("value {v} outside declared bounds"));
                        cast_error_kind = Some("bounds".to_string());
                    } else {
                        real_value = Some(v);
                    }
                }
                Err(_) => {
                    cast_error = Some(format!("'{}' is not a real number", attr.value));
                    cast_error_kind = Some("cast".to_string());
                }
            },
            Datatype::Boolean => match attr.value.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => bool_value = Some(true),
                "false" | "no" | "0" => bool_value = Some(false),
                _ => {
                    cast_error = Some(format!("'{}' is not a boolean", attr.value));
                    cast_error_kind = Some("cast".to_string());
                }
            },
            Datatype::Date => {
                if NaiveDate::parse_from_str(attr.value.trim(), "%Y-%m-%d").is_ok() {
                    date_value = Some(attr.value.trim().to_string());
                } else {
                    cast_error = Some(format!("'{}' is not a YYYY-MM-DD date", attr.value));
                    cast_error_kind = Some("date".to_string());
                }
            }
            Datatype::Enum => {
                let allowed = declared.map(|d| &d.enum_values);
                if allowed.is_some_and(|values| values.iter().any(|v| v == attr.value.trim())) {
                    enum_ref = Some(attr.value.trim().to_string());
                } else {
                    cast_error = Some(format!(
                        "'{}' is not a declared enum value",
                        attr.value
                    ));
                    cast_error_kind = Some("enum".to_string());
                }
            }
            Datatype::Xhtml => {
                ast = Some(attr.ast_json.clone());
                xhtml_value = Some(attr.value.clone());
            }
        }

        store.execute(
            "INSERT INTO attribute_values(object_ref, name, raw_value, datatype, string_value,
                int_value, real_value, bool_value, date_value, enum_ref, ast, xhtml_value,
                cast_error, cast_error_kind, from_file, line)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            &[
                &object_rowid,
                &attr.key,
                &attr.value,
                &datatype.as_str(),
                &string_value,
                &int_value,
                &real_value,
                &bool_value,
                &date_value,
                &enum_ref,
                &ast,
                &xhtml_value,
                &cast_error,
                &cast_error_kind,
                &file,
                &i64::from(line),
            ],
        )?;
        Ok(())
    }

    /// Deepest object whose expanded line range contains `line`.
    fn parent_object_for(&self, line: u32) -> Option<i64> {
        self.objects
            .iter()
            .filter(|o| o.start_line <= line && line <= o.end_line)
            .max_by_key(|o| o.start_line)
            .map(|o| o.rowid)
            .filter(|id| *id != 0)
    }

    fn harvest_relations(&self, store: &Store, spec_rowid: i64) -> Result<()> {
        let selectors = self.registry.selectors();
        for object in &self.objects {
            self.harvest_from_blocks(
                store,
                spec_rowid,
                object.rowid,
                None,
                &object.blocks,
                &selectors,
            )?;
            for attr in &object.attrs {
                let blocks = speccompiler_doc::ast::decode_blocks(&attr.ast_json)
                    .context("attribute AST round-trip")?;
                self.harvest_from_blocks(
                    store,
                    spec_rowid,
                    object.rowid,
                    Some(attr.key.as_str()),
                    &blocks,
                    &selectors,
                )?;
            }
        }
        Ok(())
    }

    fn harvest_from_blocks(
        &self,
        store: &Store,
        spec_rowid: i64,
        source_object_id: i64,
        source_attribute: Option<&str>,
        blocks: &[Block],
        selectors: &[String],
    ) -> Result<()> {
        for block in blocks {
            let block_line = block_line(block).unwrap_or(0);
            let mut links = Vec::new();
            walk_inlines(std::slice::from_ref(block), &mut |inline| {
                if let Inline::Link {
                    inlines, target, ..
                } = inline
                {
                    if selectors.iter().any(|s| s == target) {
                        links.push((
                            target.clone(),
                            speccompiler_doc::stringify_inlines(inlines).trim().to_string(),
                        ));
                    }
                }
            });
            let (file, line) = self.origin(block_line);
            for (selector, target_text) in links {
                store.execute(
                    "INSERT INTO spec_relations(specification_ref, source_object_id,
                        target_text, link_selector, source_attribute, from_file, link_line)
                     VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    &[
                        &spec_rowid,
                        &source_object_id,
                        &target_text,
                        &selector,
                        &source_attribute,
                        &file,
                        &i64::from(line),
                    ],
                )?;
            }
        }
        Ok(())
    }
}

fn block_line(block: &Block) -> Option<u32> {
    match block {
        Block::Header { line, .. }
        | Block::Para { line, .. }
        | Block::CodeBlock { line, .. }
        | Block::BlockQuote { line, .. } => Some(*line),
        _ => None,
    }
}

fn advance_section_counters(counters: &mut Vec<u32>, level: u8) {
    // Level 2 maps to depth 1.
    let depth = (level.max(2) - 1) as usize;
    counters.truncate(depth);
    while counters.len() < depth {
        counters.push(0);
    }
    if let Some(last) = counters.last_mut() {
        *last += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speccompiler_doc::parse_markdown;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const DOC: &str = "\
# SRS: Sample System @SYS-1

> owner: team-core

Preamble prose.

## System Overview

Intro text with `abbrev: API = Application Programming Interface`.

## HLR: Ingest telemetry @HLR-001

> status: draft
> priority: 3

Links to [HLR-002](@) and [diag](#).

```plantuml:diag{caption=\"Data flow\"}
A -> B
```

## HLR: Store telemetry

Body.

### Retention details

Deep section prose.
";

    fn init_sample(doc_text: &str) -> (Store, Context) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("sample.md");
        std::fs::write(&source, doc_text).unwrap();
        let expanded = crate::include::expand_includes(&source).unwrap();

        let store = Store::open_in_memory().unwrap();
        let registry = TypeRegistry::load(dir.path(), "default").unwrap();
        registry.persist(&store).unwrap();

        let doc = parse_markdown(&expanded.text);
        let mut ctx = Context::dirty("sample".to_string(), source, doc);
        let mut diags = Diagnostics::collecting(BTreeMap::new());
        initialize_document(&store, &registry, &expanded, &mut ctx, &mut diags).unwrap();
        (store, ctx)
    }

    #[test]
    fn builds_specification_and_objects_in_file_order() {
        let (store, ctx) = init_sample(DOC);
        assert!(ctx.spec_rowid > 0);

        let spec: (String, String, String) = store
            .query_one(
                "SELECT long_name, type_ref, pid FROM specifications WHERE id = ?1",
                &[&ctx.spec_rowid],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(spec, ("Sample System".to_string(), "srs".to_string(), "SYS-1".to_string()));

        let objects: Vec<(String, String, i64)> = store
            .query_all(
                "SELECT type_ref, pid, file_seq FROM spec_objects
                 WHERE specification_ref = ?1 ORDER BY file_seq",
                &[&ctx.spec_rowid],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(objects.len(), 4);
        // SECTION gets a hierarchical PID off the spec PID.
        assert_eq!(objects[0].0, "SECTION");
        assert_eq!(objects[0].1, "SYS-1-sec1");
        assert_eq!(objects[1].1, "HLR-001");
        // Auto PID skips the authored HLR-001.
        assert_eq!(objects[2].1, "HLR-002");
        assert_eq!(objects[3].0, "SECTION");
        assert_eq!(objects[3].1, "SYS-1-sec1.1");
        // file_seq strictly increasing.
        let seqs: Vec<i64> = objects.iter().map(|o| o.2).collect();
        let mut sorted = seqs.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(seqs, sorted);
    }

    #[test]
    fn attributes_are_cast_and_enum_checked() {
        let (store, ctx) = init_sample(DOC);
        let rows: Vec<(String, String, Option<i64>, Option<String>)> = store
            .query_all(
                "SELECT av.name, av.datatype, av.int_value, av.enum_ref
                 FROM attribute_values av
                 JOIN spec_objects o ON o.id = av.object_ref
                 WHERE o.specification_ref = ?1 ORDER BY av.id",
                &[&ctx.spec_rowid],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ("status".to_string(), "ENUM".to_string(), None, Some("draft".to_string())));
        assert_eq!(rows[1], ("priority".to_string(), "INTEGER".to_string(), Some(3), None));
    }

    #[test]
    fn floats_get_parent_and_caption() {
        let (store, ctx) = init_sample(DOC);
        let float: (String, String, Option<String>, Option<i64>) = store
            .query_one(
                "SELECT type_ref, label, caption, parent_object_id FROM spec_floats
                 WHERE specification_ref = ?1",
                &[&ctx.spec_rowid],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(float.0, "plantuml");
        assert_eq!(float.1, "diag");
        assert_eq!(float.2.as_deref(), Some("Data flow"));
        let parent_pid: Option<String> = store
            .query_one(
                "SELECT pid FROM spec_objects WHERE id = ?1",
                &[&float.3.unwrap()],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(parent_pid.as_deref(), Some("HLR-001"));
    }

    #[test]
    fn relations_are_harvested_unresolved() {
        let (store, ctx) = init_sample(DOC);
        let relations: Vec<(String, String, Option<String>, Option<i64>)> = store
            .query_all(
                "SELECT link_selector, target_text, type_ref, target_object_id
                 FROM spec_relations WHERE specification_ref = ?1 ORDER BY id",
                &[&ctx.spec_rowid],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(relations.len(), 2);
        assert_eq!(relations[0].0, "@");
        assert_eq!(relations[0].1, "HLR-002");
        assert!(relations[0].2.is_none());
        assert!(relations[0].3.is_none());
        assert_eq!(relations[1].0, "#");
        assert_eq!(relations[1].1, "diag");
    }

    #[test]
    fn inline_views_are_registered() {
        let (store, ctx) = init_sample(DOC);
        let views: Vec<(String, bool)> = store
            .query_all(
                "SELECT type_ref, is_inline FROM spec_views WHERE specification_ref = ?1",
                &[&ctx.spec_rowid],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0], ("abbrev".to_string(), true));
    }

    #[test]
    fn reinitialization_is_idempotent_for_pids() {
        let (store, ctx) = init_sample(DOC);
        let before: Vec<String> = store
            .query_all(
                "SELECT pid FROM spec_objects WHERE specification_ref = ?1 ORDER BY file_seq",
                &[&ctx.spec_rowid],
                |r| r.get(0),
            )
            .unwrap();

        // Re-run against the same store.
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("sample.md");
        std::fs::write(&source, DOC).unwrap();
        let expanded = crate::include::expand_includes(&source).unwrap();
        let registry = TypeRegistry::load(dir.path(), "default").unwrap();
        let doc = parse_markdown(&expanded.text);
        let mut ctx2 = Context::dirty("sample".to_string(), source, doc);
        let mut diags = Diagnostics::collecting(BTreeMap::new());
        initialize_document(&store, &registry, &expanded, &mut ctx2, &mut diags).unwrap();

        let after: Vec<String> = store
            .query_all(
                "SELECT pid FROM spec_objects WHERE specification_ref = ?1 ORDER BY file_seq",
                &[&ctx2.spec_rowid],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(ctx.spec_rowid, ctx2.spec_rowid);
    }

    #[test]
    fn missing_h1_reports_diagnostic() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("bare.md");
        std::fs::write(&source, "## Only an object\n\nprose\n").unwrap();
        let expanded = crate::include::expand_includes(&source).unwrap();
        let store = Store::open_in_memory().unwrap();
        let registry = TypeRegistry::load(dir.path(), "default").unwrap();
        let doc = parse_markdown(&expanded.text);
        let mut ctx = Context::dirty("bare".to_string(), source, doc);
        let mut diags = Diagnostics::collecting(BTreeMap::new());
        initialize_document(&store, &registry, &expanded, &mut ctx, &mut diags).unwrap();
        assert!(diags.has_errors());
    }

    #[test]
    fn unknown_attribute_key_defaults_to_string() {
        let text = "# Doc\n\n## HLR: Thing @HLR-001\n\n> wild_key: anything goes\n";
        let (store, ctx) = init_sample(text);
        let row: Option<(String, Option<String>)> = store
            .query_one(
                "SELECT av.datatype, av.string_value FROM attribute_values av
                 JOIN spec_objects o ON o.id = av.object_ref
                 WHERE o.specification_ref = ?1 AND av.name = 'wild_key'",
                &[&ctx.spec_rowid],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(
            row,
            Some(("STRING".to_string(), Some("anything goes".to_string())))
        );
    }

    #[test]
    fn bounds_violation_records_cast_error() {
        let text = "# Doc\n\n## HLR: Thing @HLR-001\n\n> priority: 9\n";
        let (store, ctx) = init_sample(text);
        let row: Option<(Option<i64>, Option<String>)> = store
            .query_one(
                "SELECT av.int_value, av.cast_error_kind FROM attribute_values av
                 JOIN spec_objects o ON o.id = av.object_ref
                 WHERE o.specification_ref = ?1 AND av.name = 'priority'",
                &[&ctx.spec_rowid],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(row, Some((None, Some("bounds".to_string()))));
    }
}

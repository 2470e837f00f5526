//! Schema DDL
//!
//! Two families of tables with different lifecycles:
//!
//! - **Type tables** mirror the model overlays and are dropped and
//!   recreated on every open. Their content is owned by the model loader.
//! - **Content and build tables** persist across runs. Content rows are
//!   deleted per-specification when that specification is dirty; build and
//!   cache rows are committed per-document after a successful emit.

use crate::error::StoreError;
use rusqlite::Connection;

const DROP_TYPE_TABLES: &str = "
DROP TABLE IF EXISTS object_types;
DROP TABLE IF EXISTS attribute_types;
DROP TABLE IF EXISTS enum_values;
DROP TABLE IF EXISTS float_types;
DROP TABLE IF EXISTS relation_types;
DROP TABLE IF EXISTS view_types;
DROP TABLE IF EXISTS specification_types;
DROP TABLE IF EXISTS datatype_definitions;
";

const CREATE_TYPE_TABLES: &str = "
CREATE TABLE object_types (
    identifier   TEXT PRIMARY KEY,
    long_name    TEXT,
    extends      TEXT,
    is_composite INTEGER NOT NULL DEFAULT 0,
    is_default   INTEGER NOT NULL DEFAULT 0,
    pid_prefix   TEXT,
    pid_format   TEXT,
    aliases      TEXT NOT NULL DEFAULT ','
);
CREATE TABLE attribute_types (
    id              INTEGER PRIMARY KEY,
    object_type_ref TEXT NOT NULL,
    name            TEXT NOT NULL,
    datatype        TEXT NOT NULL,
    min_occurs      INTEGER NOT NULL DEFAULT 0,
    max_occurs      INTEGER,
    min_value       REAL,
    max_value       REAL,
    UNIQUE(object_type_ref, name)
);
CREATE TABLE enum_values (
    id                INTEGER PRIMARY KEY,
    attribute_type_id INTEGER NOT NULL,
    value             TEXT NOT NULL
);
CREATE TABLE float_types (
    identifier            TEXT PRIMARY KEY,
    caption_format        TEXT,
    counter_group         TEXT,
    aliases               TEXT NOT NULL DEFAULT ',',
    style_id              TEXT,
    needs_external_render INTEGER NOT NULL DEFAULT 0,
    render_command        TEXT,
    render_timeout_secs   INTEGER,
    output_ext            TEXT,
    source_ext            TEXT
);
CREATE TABLE relation_types (
    identifier       TEXT PRIMARY KEY,
    extends          TEXT,
    link_selector    TEXT,
    source_type_ref  TEXT,
    target_type_ref  TEXT,
    source_attribute TEXT,
    aliases          TEXT NOT NULL DEFAULT ',',
    is_default       INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE view_types (
    identifier            TEXT PRIMARY KEY,
    inline_prefix         TEXT,
    aliases               TEXT NOT NULL DEFAULT ',',
    counter_group         TEXT,
    view_subtype_ref      TEXT,
    materializer_type     TEXT,
    needs_external_render INTEGER NOT NULL DEFAULT 0,
    render_command        TEXT,
    render_timeout_secs   INTEGER
);
CREATE TABLE specification_types (
    identifier TEXT PRIMARY KEY,
    extends    TEXT,
    is_default INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE datatype_definitions (
    identifier TEXT PRIMARY KEY,
    base       TEXT NOT NULL
);
";

const CREATE_CONTENT_TABLES: &str = "
CREATE TABLE IF NOT EXISTS specifications (
    id         INTEGER PRIMARY KEY,
    identifier TEXT NOT NULL UNIQUE,
    root_path  TEXT NOT NULL,
    long_name  TEXT,
    type_ref   TEXT,
    pid        TEXT,
    header_ast TEXT,
    body_ast   TEXT
);
CREATE TABLE IF NOT EXISTS spec_objects (
    id                INTEGER PRIMARY KEY,
    content_sha       TEXT NOT NULL,
    specification_ref INTEGER NOT NULL,
    type_ref          TEXT NOT NULL,
    from_file         TEXT NOT NULL,
    file_seq          INTEGER NOT NULL,
    pid               TEXT,
    pid_prefix        TEXT,
    pid_sequence      INTEGER,
    pid_auto_generated INTEGER NOT NULL DEFAULT 0,
    title_text        TEXT,
    label             TEXT,
    level             INTEGER NOT NULL,
    start_line        INTEGER,
    end_line          INTEGER,
    ast               TEXT,
    UNIQUE(specification_ref, file_seq)
);
CREATE INDEX IF NOT EXISTS idx_spec_objects_spec ON spec_objects(specification_ref);
CREATE INDEX IF NOT EXISTS idx_spec_objects_pid ON spec_objects(pid);
CREATE TABLE IF NOT EXISTS attribute_values (
    id              INTEGER PRIMARY KEY,
    object_ref      INTEGER,
    float_ref       INTEGER,
    spec_ref        INTEGER,
    name            TEXT NOT NULL,
    raw_value       TEXT,
    datatype        TEXT NOT NULL,
    string_value    TEXT,
    int_value       INTEGER,
    real_value      REAL,
    bool_value      INTEGER,
    date_value      TEXT,
    enum_ref        TEXT,
    ast             TEXT,
    xhtml_value     TEXT,
    cast_error      TEXT,
    cast_error_kind TEXT,
    from_file       TEXT,
    line            INTEGER
);
CREATE INDEX IF NOT EXISTS idx_attribute_values_object ON attribute_values(object_ref);
CREATE TABLE IF NOT EXISTS spec_floats (
    id                INTEGER PRIMARY KEY,
    content_sha       TEXT NOT NULL,
    specification_ref INTEGER NOT NULL,
    type_ref          TEXT NOT NULL,
    from_file         TEXT,
    file_seq          INTEGER NOT NULL,
    start_line        INTEGER,
    label             TEXT,
    anchor            TEXT,
    number            INTEGER,
    caption           TEXT,
    raw_content       TEXT,
    raw_ast           TEXT,
    resolved_ast      TEXT,
    parent_object_id  INTEGER,
    pandoc_attributes TEXT,
    syntax_key        TEXT,
    UNIQUE(specification_ref, file_seq)
);
CREATE INDEX IF NOT EXISTS idx_spec_floats_spec ON spec_floats(specification_ref);
CREATE TABLE IF NOT EXISTS spec_views (
    id                INTEGER PRIMARY KEY,
    content_sha       TEXT,
    specification_ref INTEGER NOT NULL,
    type_ref          TEXT NOT NULL,
    from_file         TEXT,
    file_seq          INTEGER NOT NULL,
    start_line        INTEGER,
    label             TEXT,
    raw_content       TEXT,
    raw_ast           TEXT,
    resolved_ast      TEXT,
    resolved_data     TEXT,
    parent_object_id  INTEGER,
    is_inline         INTEGER NOT NULL DEFAULT 0,
    UNIQUE(specification_ref, file_seq)
);
CREATE TABLE IF NOT EXISTS spec_relations (
    id                INTEGER PRIMARY KEY,
    specification_ref INTEGER NOT NULL,
    source_object_id  INTEGER,
    target_text       TEXT NOT NULL,
    target_object_id  INTEGER,
    target_float_id   INTEGER,
    type_ref          TEXT,
    link_selector     TEXT NOT NULL,
    source_attribute  TEXT,
    from_file         TEXT,
    link_line         INTEGER,
    is_ambiguous      INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_spec_relations_spec ON spec_relations(specification_ref);
";

const CREATE_BUILD_TABLES: &str = "
CREATE TABLE IF NOT EXISTS source_files (
    path TEXT PRIMARY KEY,
    sha1 TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS build_graph (
    root_path TEXT NOT NULL,
    node_path TEXT NOT NULL,
    node_sha1 TEXT NOT NULL,
    PRIMARY KEY(root_path, node_path)
);
CREATE TABLE IF NOT EXISTS output_cache (
    spec_id      TEXT NOT NULL,
    output_path  TEXT NOT NULL,
    pir_hash     TEXT NOT NULL,
    generated_at TEXT NOT NULL,
    PRIMARY KEY(spec_id, output_path)
);
CREATE TABLE IF NOT EXISTS kv_store (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const CREATE_FTS_TABLES: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS fts_objects USING fts5(
    spec_id UNINDEXED, object_id UNINDEXED, pid, title, body,
    tokenize='porter unicode61'
);
CREATE VIRTUAL TABLE IF NOT EXISTS fts_attributes USING fts5(
    spec_id UNINDEXED, attribute_id UNINDEXED, name, value,
    tokenize='porter unicode61'
);
CREATE VIRTUAL TABLE IF NOT EXISTS fts_floats USING fts5(
    spec_id UNINDEXED, float_id UNINDEXED, label, caption, content,
    tokenize='porter unicode61'
);
";

/// Apply the full schema: recreate type tables, ensure everything else.
pub fn apply(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(DROP_TYPE_TABLES)?;
    conn.execute_batch(CREATE_TYPE_TABLES)?;
    conn.execute_batch(CREATE_CONTENT_TABLES)?;
    conn.execute_batch(CREATE_BUILD_TABLES)?;
    conn.execute_batch(CREATE_FTS_TABLES)?;
    Ok(())
}

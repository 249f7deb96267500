//! SQL migration definitions for the kbforge record store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: incidents, knowledge_bases, articles, relationships",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Source incidents
CREATE TABLE IF NOT EXISTS incidents (
    id                 TEXT PRIMARY KEY,
    number             TEXT NOT NULL,
    short_description  TEXT,
    description        TEXT,
    category           TEXT,
    subcategory        TEXT,
    configuration_item TEXT,
    assignment_group   TEXT,
    close_notes        TEXT,
    created_at         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_incidents_number ON incidents(number);

-- Knowledge-base containers
CREATE TABLE IF NOT EXISTS knowledge_bases (
    id         TEXT PRIMARY KEY,
    title      TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Articles; `seq` drives the human-facing KB number
CREATE TABLE IF NOT EXISTS articles (
    seq               INTEGER PRIMARY KEY AUTOINCREMENT,
    id                TEXT NOT NULL UNIQUE,
    knowledge_base_id TEXT REFERENCES knowledge_bases(id),
    title             TEXT NOT NULL,
    body              TEXT NOT NULL,
    workflow_state    TEXT NOT NULL,
    model             TEXT,
    prompt_hash       TEXT,
    created_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_articles_kb ON articles(knowledge_base_id);

-- Traceability links between records
CREATE TABLE IF NOT EXISTS relationships (
    id         TEXT PRIMARY KEY,
    parent_id  TEXT NOT NULL,
    child_id   TEXT NOT NULL,
    kind       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_relationships_parent ON relationships(parent_id);
CREATE INDEX IF NOT EXISTS idx_relationships_child ON relationships(child_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}

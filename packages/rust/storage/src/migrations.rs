//! SQL migration definitions for the ecotax metadata database.
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
    vec![
        Migration {
            version: 1,
            description: "Initial schema: title_embeddings, cluster_assignments, progression_edges",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Mirror of the vector store, one row per (chunk_type, title)
CREATE TABLE IF NOT EXISTS title_embeddings (
    normalized_title TEXT NOT NULL,
    chunk_type       TEXT NOT NULL,
    text             TEXT NOT NULL,
    dimension        INTEGER NOT NULL,
    embedding_json   TEXT NOT NULL,
    metadata_json    TEXT,
    updated_at       TEXT NOT NULL,
    UNIQUE(chunk_type, normalized_title)
);

-- Cluster membership per clustering method
CREATE TABLE IF NOT EXISTS cluster_assignments (
    normalized_title TEXT NOT NULL,
    cluster_id       INTEGER NOT NULL,
    method           TEXT NOT NULL,
    quality_score    REAL,
    metadata_json    TEXT,
    updated_at       TEXT NOT NULL,
    UNIQUE(normalized_title, method)
);

CREATE INDEX IF NOT EXISTS idx_cluster_assignments_cluster
    ON cluster_assignments(method, cluster_id);

-- Seniority transitions
CREATE TABLE IF NOT EXISTS progression_edges (
    from_level     TEXT NOT NULL,
    to_level       TEXT NOT NULL,
    confidence     REAL NOT NULL,
    evidence_count INTEGER NOT NULL,
    probability    REAL NOT NULL,
    examples_json  TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    UNIQUE(from_level, to_level)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}

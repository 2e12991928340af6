use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

pub const SCHEMA_VERSION: i64 = 1;

/// Cross-dump metadata: repositories, the commit graph, dumps and packages.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS repositories (
            id INTEGER PRIMARY KEY,
            name TEXT
        );

        CREATE TABLE IF NOT EXISTS commits (
            repository_id INTEGER NOT NULL,
            commit_sha TEXT NOT NULL,
            parent_sha TEXT NOT NULL DEFAULT '',
            UNIQUE(repository_id, commit_sha, parent_sha)
        );

        CREATE INDEX IF NOT EXISTS idx_commits_commit ON commits(repository_id, commit_sha);

        CREATE TABLE IF NOT EXISTS dumps (
            id INTEGER PRIMARY KEY,
            repository_id INTEGER NOT NULL,
            commit_sha TEXT NOT NULL,
            root TEXT NOT NULL DEFAULT '',
            indexer TEXT NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_dumps_commit ON dumps(repository_id, commit_sha);

        CREATE TABLE IF NOT EXISTS packages (
            scheme TEXT NOT NULL,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            dump_id INTEGER NOT NULL,
            PRIMARY KEY(scheme, name, version)
        );

        CREATE TABLE IF NOT EXISTS package_references (
            id INTEGER PRIMARY KEY,
            dump_id INTEGER NOT NULL,
            scheme TEXT NOT NULL,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            filter BLOB
        );

        CREATE INDEX IF NOT EXISTS idx_package_references_package
            ON package_references(scheme, name, version);
        COMMIT;
        ",
    )?;
    set_schema_version(conn)?;
    Ok(())
}

/// Per-dump bundle file: metadata, JSON-encoded documents and result chunks,
/// and the two moniker tables.
pub fn migrate_bundle(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;
        CREATE TABLE IF NOT EXISTS meta (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            num_result_chunks INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS documents (
            path TEXT PRIMARY KEY,
            data TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS result_chunks (
            id INTEGER PRIMARY KEY,
            data TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS moniker_definitions (
            id INTEGER PRIMARY KEY,
            scheme TEXT NOT NULL,
            identifier TEXT NOT NULL,
            path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            start_character INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            end_character INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_moniker_definitions
            ON moniker_definitions(scheme, identifier);

        CREATE TABLE IF NOT EXISTS moniker_references (
            id INTEGER PRIMARY KEY,
            scheme TEXT NOT NULL,
            identifier TEXT NOT NULL,
            path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            start_character INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            end_character INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_moniker_references
            ON moniker_references(scheme, identifier);
        COMMIT;
        ",
    )?;
    Ok(())
}

fn set_schema_version(conn: &Connection) -> Result<()> {
    let current: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    let expected = SCHEMA_VERSION.to_string();
    if current.as_deref() != Some(expected.as_str()) {
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![expected],
        )?;
    }
    Ok(())
}

use crate::bloom::IdentifierFilter;
use crate::config::Config;
use crate::context::QueryContext;
use crate::model::Dump;
use crate::store::{PackageReference, ReferencePager, Store};
use crate::util::{ensure_parent_dir, normalize_root};
use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

mod bundle;
mod migrations;

pub use bundle::{SqliteBundleReader, SqliteReaderSource, bundle_path, write_bundle};

#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(())
    }

    fn on_release(&self, _conn: Connection) {}
}

/// Cross-dump metadata in a SQLite database: dumps, the commit graph,
/// packages and package references.
pub struct SqliteStore {
    db_path: PathBuf,
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Pool<SqliteConnectionManager>,
    commit_traversal_limit: usize,
}

impl SqliteStore {
    pub fn open(db_path: &Path, config: &Config) -> Result<Self> {
        ensure_parent_dir(db_path)?;
        info!(
            pool_size = config.pool_size,
            min_idle = config.pool_min_idle,
            "Initializing store connection pool"
        );

        // Open write connection first and run migrations
        let write_conn = Connection::open(db_path)
            .with_context(|| format!("open sqlite db at {}", db_path.display()))?;
        write_conn.busy_timeout(Duration::from_secs(30))?;
        write_conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        migrations::migrate(&write_conn)?;
        let write_conn = Arc::new(Mutex::new(write_conn));

        let manager = SqliteConnectionManager::file(db_path);
        let read_pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .min_idle(Some(config.pool_min_idle))
            .connection_timeout(Duration::from_secs(30))
            .connection_customizer(Box::new(ConnectionCustomizer))
            .build(manager)
            .with_context(|| "create connection pool")?;

        Ok(Self {
            db_path: db_path.to_path_buf(),
            write_conn,
            read_pool,
            commit_traversal_limit: config.commit_traversal_limit,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn read_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.read_pool
            .get()
            .with_context(|| "get read connection from pool")
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.write_conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add_repository(&self, repository_id: i64, name: Option<&str>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO repositories (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = COALESCE(excluded.name, repositories.name)",
            params![repository_id, name],
        )?;
        Ok(())
    }

    pub fn insert_dump(&self, dump: &Dump) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO repositories (id) VALUES (?1)",
            params![dump.repository_id],
        )?;
        tx.execute(
            "INSERT INTO dumps (id, repository_id, commit_sha, root, indexer)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                repository_id = excluded.repository_id,
                commit_sha = excluded.commit_sha,
                root = excluded.root,
                indexer = excluded.indexer",
            params![dump.id, dump.repository_id, dump.commit, normalize_root(&dump.root), dump.indexer],
        )?;
        // The dump's commit is known even before the graph is synced.
        tx.execute(
            "INSERT OR IGNORE INTO commits (repository_id, commit_sha, parent_sha) VALUES (?1, ?2, '')",
            params![dump.repository_id, dump.commit],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Inserts `(commit, parents)` edges. Returns the number of new rows.
    pub fn insert_commits(&self, repository_id: i64, commits: &[(String, Vec<String>)]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut repo_stmt = tx.prepare("INSERT OR IGNORE INTO repositories (id) VALUES (?1)")?;
            repo_stmt.execute(params![repository_id])?;
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO commits (repository_id, commit_sha, parent_sha) VALUES (?1, ?2, ?3)",
            )?;
            for (commit, parents) in commits {
                if parents.is_empty() {
                    inserted += stmt.execute(params![repository_id, commit, ""])?;
                }
                for parent in parents {
                    inserted += stmt.execute(params![repository_id, commit, parent])?;
                }
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn insert_package(&self, scheme: &str, name: &str, version: &str, dump_id: i64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO packages (scheme, name, version, dump_id) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(scheme, name, version) DO UPDATE SET dump_id = excluded.dump_id",
            params![scheme, name, version, dump_id],
        )?;
        Ok(())
    }

    pub fn insert_package_reference(
        &self,
        dump_id: i64,
        scheme: &str,
        name: &str,
        version: &str,
        filter: Option<&IdentifierFilter>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO package_references (dump_id, scheme, name, version, filter)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![dump_id, scheme, name, version, filter.map(IdentifierFilter::to_bytes)],
        )?;
        Ok(())
    }

    /// Nearest dump per (root, indexer) among the commit and its ancestors.
    fn visible_dumps(&self, conn: &Connection, repository_id: i64, commit: &str) -> Result<Vec<Dump>> {
        let mut stmt = conn.prepare(
            "WITH RECURSIVE lineage(commit_sha, distance) AS (
                SELECT ?2, 0
                UNION
                SELECT c.parent_sha, l.distance + 1
                FROM commits c
                JOIN lineage l ON c.commit_sha = l.commit_sha
                WHERE c.repository_id = ?1 AND c.parent_sha != '' AND l.distance < ?3
             )
             SELECT d.id, d.repository_id, d.commit_sha, d.root, d.indexer, MIN(l.distance) AS distance
             FROM dumps d
             JOIN lineage l ON l.commit_sha = d.commit_sha
             WHERE d.repository_id = ?1
             GROUP BY d.id
             ORDER BY distance, d.id",
        )?;
        let rows = stmt.query_map(
            params![repository_id, commit, self.commit_traversal_limit as i64],
            dump_from_row,
        )?;

        let mut seen = HashSet::new();
        let mut dumps = Vec::new();
        for row in rows {
            let dump = row?;
            if seen.insert((dump.root.clone(), dump.indexer.clone())) {
                dumps.push(dump);
            }
        }
        Ok(dumps)
    }
}

fn dump_from_row(row: &Row<'_>) -> rusqlite::Result<Dump> {
    Ok(Dump {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        commit: row.get(2)?,
        root: row.get(3)?,
        indexer: row.get(4)?,
    })
}

fn reference_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, Option<Vec<u8>>)> {
    Ok((row.get(0)?, row.get(1)?))
}

enum PagerScope {
    /// References from these dumps only.
    Dumps(String),
    /// References from dumps outside this repository.
    OtherRepositories(i64),
}

struct SqlReferencePager<'a> {
    store: &'a SqliteStore,
    scheme: String,
    name: String,
    version: String,
    scope: PagerScope,
    page_size: usize,
}

impl SqlReferencePager<'_> {
    fn count(&self) -> Result<usize> {
        let conn = self.store.read_conn()?;
        let count: i64 = match &self.scope {
            PagerScope::Dumps(dump_ids) => conn.query_row(
                "SELECT COUNT(*) FROM package_references
                 WHERE scheme = ?1 AND name = ?2 AND version = ?3
                   AND dump_id IN (SELECT value FROM json_each(?4))",
                params![self.scheme, self.name, self.version, dump_ids],
                |row| row.get(0),
            )?,
            PagerScope::OtherRepositories(repository_id) => conn.query_row(
                "SELECT COUNT(*) FROM package_references pr
                 JOIN dumps d ON d.id = pr.dump_id
                 WHERE pr.scheme = ?1 AND pr.name = ?2 AND pr.version = ?3
                   AND d.repository_id != ?4",
                params![self.scheme, self.name, self.version, repository_id],
                |row| row.get(0),
            )?,
        };
        Ok(count as usize)
    }
}

impl ReferencePager for SqlReferencePager<'_> {
    fn page_from_offset(&self, ctx: &QueryContext, offset: usize) -> Result<Vec<PackageReference>> {
        ctx.check()?;
        let conn = self.store.read_conn()?;
        let limit = self.page_size as i64;
        let offset = offset as i64;
        let rows: Vec<(i64, Option<Vec<u8>>)> = match &self.scope {
            PagerScope::Dumps(dump_ids) => {
                let mut stmt = conn.prepare(
                    "SELECT dump_id, filter FROM package_references
                     WHERE scheme = ?1 AND name = ?2 AND version = ?3
                       AND dump_id IN (SELECT value FROM json_each(?4))
                     ORDER BY dump_id, id
                     LIMIT ?5 OFFSET ?6",
                )?;
                let rows = stmt.query_map(
                    params![self.scheme, self.name, self.version, dump_ids, limit, offset],
                    reference_from_row,
                )?;
                rows.collect::<rusqlite::Result<_>>()?
            }
            PagerScope::OtherRepositories(repository_id) => {
                let mut stmt = conn.prepare(
                    "SELECT pr.dump_id, pr.filter FROM package_references pr
                     JOIN dumps d ON d.id = pr.dump_id
                     WHERE pr.scheme = ?1 AND pr.name = ?2 AND pr.version = ?3
                       AND d.repository_id != ?4
                     ORDER BY pr.dump_id, pr.id
                     LIMIT ?5 OFFSET ?6",
                )?;
                let rows = stmt.query_map(
                    params![self.scheme, self.name, self.version, repository_id, limit, offset],
                    reference_from_row,
                )?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };

        rows.into_iter()
            .map(|(dump_id, filter)| {
                let filter = filter
                    .map(|bytes| IdentifierFilter::from_bytes(&bytes))
                    .transpose()
                    .with_context(|| format!("decode identifier filter of dump {dump_id}"))?;
                Ok(PackageReference { dump_id, filter })
            })
            .collect()
    }
}

impl Store for SqliteStore {
    fn get_dump_by_id(&self, ctx: &QueryContext, id: i64) -> Result<Option<Dump>> {
        ctx.check()?;
        let conn = self.read_conn()?;
        let dump = conn
            .query_row(
                "SELECT id, repository_id, commit_sha, root, indexer FROM dumps WHERE id = ?1",
                params![id],
                dump_from_row,
            )
            .optional()?;
        Ok(dump)
    }

    fn find_closest_dumps(
        &self,
        ctx: &QueryContext,
        repository_id: i64,
        commit: &str,
        path: &str,
        exact_path: bool,
        indexer: Option<&str>,
    ) -> Result<Vec<Dump>> {
        ctx.check()?;
        let conn = self.read_conn()?;
        let dumps = self
            .visible_dumps(&conn, repository_id, commit)
            .with_context(|| format!("visible dumps of repository {repository_id} at {commit}"))?;
        Ok(dumps
            .into_iter()
            .filter(|dump| indexer.is_none_or(|indexer| indexer == dump.indexer))
            .filter(|dump| path.starts_with(&dump.root) || (!exact_path && dump.root.starts_with(path)))
            .collect())
    }

    fn has_commit(&self, ctx: &QueryContext, repository_id: i64, commit: &str) -> Result<bool> {
        ctx.check()?;
        let conn = self.read_conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM commits WHERE repository_id = ?1 AND commit_sha = ?2)",
            params![repository_id, commit],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn has_repository(&self, ctx: &QueryContext, repository_id: i64) -> Result<bool> {
        ctx.check()?;
        let conn = self.read_conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM repositories WHERE id = ?1)
                 OR EXISTS(SELECT 1 FROM dumps WHERE repository_id = ?1)",
            params![repository_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn get_package(
        &self,
        ctx: &QueryContext,
        scheme: &str,
        name: &str,
        version: &str,
    ) -> Result<Option<Dump>> {
        ctx.check()?;
        let conn = self.read_conn()?;
        let dump = conn
            .query_row(
                "SELECT d.id, d.repository_id, d.commit_sha, d.root, d.indexer
                 FROM packages p
                 JOIN dumps d ON d.id = p.dump_id
                 WHERE p.scheme = ?1 AND p.name = ?2 AND p.version = ?3",
                params![scheme, name, version],
                dump_from_row,
            )
            .optional()?;
        Ok(dump)
    }

    fn same_repo_pager<'a>(
        &'a self,
        ctx: &QueryContext,
        repository_id: i64,
        commit: &str,
        scheme: &str,
        name: &str,
        version: &str,
        limit: usize,
    ) -> Result<(usize, Box<dyn ReferencePager + 'a>)> {
        ctx.check()?;
        let visible: Vec<i64> = {
            let conn = self.read_conn()?;
            self.visible_dumps(&conn, repository_id, commit)?
                .into_iter()
                .map(|dump| dump.id)
                .collect()
        };
        let pager = SqlReferencePager {
            store: self,
            scheme: scheme.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            scope: PagerScope::Dumps(serde_json::to_string(&visible)?),
            page_size: limit.max(1),
        };
        let total = pager.count()?;
        Ok((total, Box::new(pager)))
    }

    fn package_reference_pager<'a>(
        &'a self,
        ctx: &QueryContext,
        scheme: &str,
        name: &str,
        version: &str,
        repository_id: i64,
        limit: usize,
    ) -> Result<(usize, Box<dyn ReferencePager + 'a>)> {
        ctx.check()?;
        let pager = SqlReferencePager {
            store: self,
            scheme: scheme.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            scope: PagerScope::OtherRepositories(repository_id),
            page_size: limit.max(1),
        };
        let total = pager.count()?;
        Ok((total, Box::new(pager)))
    }
}

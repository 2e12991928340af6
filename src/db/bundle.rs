use super::migrations;
use crate::bundle::{BundleData, MonikerRow};
use crate::context::QueryContext;
use crate::model::{
    DocumentData, Location, MetaData, MonikerTable, Range, ResultChunkData,
};
use crate::store::{BundleReader, ReaderSource};
use crate::util::ensure_parent_dir;
use crate::error::{Error, MissingKind};
use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

/// Location of a dump's bundle file inside the bundle directory.
pub fn bundle_path(dir: &Path, dump_id: i64) -> PathBuf {
    dir.join(format!("{dump_id}.sqlite"))
}

/// Writes a complete bundle file, replacing any previous contents.
pub fn write_bundle(path: &Path, data: &BundleData) -> Result<()> {
    ensure_parent_dir(path)?;
    let mut conn = Connection::open(path)
        .with_context(|| format!("open bundle at {}", path.display()))?;
    migrations::migrate_bundle(&conn)?;

    let tx = conn.transaction()?;
    tx.execute_batch(
        "DELETE FROM meta;
         DELETE FROM documents;
         DELETE FROM result_chunks;
         DELETE FROM moniker_definitions;
         DELETE FROM moniker_references;",
    )?;
    if let Some(meta) = data.meta {
        tx.execute(
            "INSERT INTO meta (id, num_result_chunks) VALUES (0, ?1)",
            params![meta.num_result_chunks as i64],
        )?;
    }
    {
        let mut stmt = tx.prepare("INSERT INTO documents (path, data) VALUES (?1, ?2)")?;
        for (path, document) in &data.documents {
            stmt.execute(params![path, serde_json::to_string(document)?])?;
        }
        let mut stmt = tx.prepare("INSERT INTO result_chunks (id, data) VALUES (?1, ?2)")?;
        for (index, chunk) in &data.result_chunks {
            stmt.execute(params![*index as i64, serde_json::to_string(chunk)?])?;
        }
        insert_moniker_rows(&tx, MonikerTable::Definitions, &data.definitions)?;
        insert_moniker_rows(&tx, MonikerTable::References, &data.references)?;
    }
    tx.commit()?;
    Ok(())
}

fn table_name(table: MonikerTable) -> &'static str {
    match table {
        MonikerTable::Definitions => "moniker_definitions",
        MonikerTable::References => "moniker_references",
    }
}

fn insert_moniker_rows(conn: &Connection, table: MonikerTable, rows: &[MonikerRow]) -> Result<()> {
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} (scheme, identifier, path, start_line, start_character, end_line, end_character)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        table_name(table)
    ))?;
    for row in rows {
        let range = row.location.range;
        stmt.execute(params![
            row.scheme,
            row.identifier,
            row.location.path,
            range.start.line,
            range.start.character,
            range.end.line,
            range.end.character,
        ])?;
    }
    Ok(())
}

#[derive(Debug)]
struct ReadOnlyCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ReadOnlyCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(30))
    }
}

/// Read-only access to one bundle file through a small connection pool.
pub struct SqliteBundleReader {
    dump_id: i64,
    path: PathBuf,
    pool: RwLock<Option<Pool<SqliteConnectionManager>>>,
}

impl SqliteBundleReader {
    pub fn open(dump_id: i64, path: &Path, pool_size: u32) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .min_idle(Some(1))
            .connection_timeout(Duration::from_secs(30))
            .connection_customizer(Box::new(ReadOnlyCustomizer))
            .build(manager)
            .with_context(|| format!("open bundle at {}", path.display()))?;
        Ok(Self {
            dump_id,
            path: path.to_path_buf(),
            pool: RwLock::new(Some(pool)),
        })
    }

    fn with_conn<T>(&self, ctx: &QueryContext, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        ctx.check()?;
        let pool = {
            let guard = match self.pool.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone()
        };
        let Some(pool) = pool else {
            return Err(Error::BundleUnavailable(self.dump_id).into());
        };
        let conn = match pool.get() {
            Ok(conn) => conn,
            Err(_) if !self.path.is_file() => {
                return Err(Error::BundleUnavailable(self.dump_id).into());
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("get connection for bundle {}", self.path.display())));
            }
        };
        f(&conn)
    }
}

impl BundleReader for SqliteBundleReader {
    fn read_meta(&self, ctx: &QueryContext) -> Result<Option<MetaData>> {
        self.with_conn(ctx, |conn| {
            let raw: Option<i64> = conn
                .query_row("SELECT num_result_chunks FROM meta WHERE id = 0", [], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(raw) = raw else {
                return Ok(None);
            };
            let num_result_chunks = usize::try_from(raw).map_err(|_| {
                Error::malformed(self.dump_id, MissingKind::Metadata, format!("num_result_chunks={raw}"))
            })?;
            Ok(Some(MetaData { num_result_chunks }))
        })
    }

    fn read_document(&self, ctx: &QueryContext, path: &str) -> Result<Option<DocumentData>> {
        self.with_conn(ctx, |conn| {
            let data: Option<String> = conn
                .query_row("SELECT data FROM documents WHERE path = ?1", params![path], |row| {
                    row.get(0)
                })
                .optional()?;
            data.map(|json| {
                serde_json::from_str(&json).with_context(|| format!("decode document {path}"))
            })
            .transpose()
        })
    }

    fn read_result_chunk(&self, ctx: &QueryContext, index: usize) -> Result<Option<ResultChunkData>> {
        self.with_conn(ctx, |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM result_chunks WHERE id = ?1",
                    params![index as i64],
                    |row| row.get(0),
                )
                .optional()?;
            data.map(|json| {
                serde_json::from_str(&json).with_context(|| format!("decode result chunk {index}"))
            })
            .transpose()
        })
    }

    fn read_monikers(
        &self,
        ctx: &QueryContext,
        table: MonikerTable,
        scheme: &str,
        identifier: &str,
        skip: usize,
        take: Option<usize>,
    ) -> Result<(Vec<Location>, usize)> {
        self.with_conn(ctx, |conn| {
            let table = table_name(table);
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE scheme = ?1 AND identifier = ?2"),
                params![scheme, identifier],
                |row| row.get(0),
            )?;

            // SQLite treats a negative LIMIT as unbounded.
            let limit = take.map_or(-1, |take| i64::try_from(take).unwrap_or(i64::MAX));
            let offset = i64::try_from(skip).unwrap_or(i64::MAX);
            let mut stmt = conn.prepare(&format!(
                "SELECT path, start_line, start_character, end_line, end_character
                 FROM {table}
                 WHERE scheme = ?1 AND identifier = ?2
                 ORDER BY path, start_line, start_character
                 LIMIT ?3 OFFSET ?4"
            ))?;
            let rows = stmt.query_map(params![scheme, identifier, limit, offset], |row| {
                Ok(Location::new(
                    row.get::<_, String>(0)?,
                    Range::new(row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?),
                ))
            })?;
            let locations = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok((locations, total as usize))
        })
    }

    fn paths_with_prefix(&self, ctx: &QueryContext, prefix: &str) -> Result<Vec<String>> {
        self.with_conn(ctx, |conn| {
            let mut stmt = conn.prepare(
                "SELECT path FROM documents
                 WHERE substr(path, 1, length(?1)) = ?1
                 ORDER BY path",
            )?;
            let rows = stmt.query_map(params![prefix], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
        })
    }

    /// Connections close once in-flight queries return theirs.
    fn close(&self) -> Result<()> {
        let pool = match self.pool.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if pool.is_some() {
            debug!(dump_id = self.dump_id, path = %self.path.display(), "closed bundle");
        }
        Ok(())
    }
}

/// Opens `<dir>/<dump_id>.sqlite` bundle files. A missing file means the
/// dump's data is unavailable.
pub struct SqliteReaderSource {
    dir: PathBuf,
    pool_size: u32,
}

impl SqliteReaderSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pool_size: 4,
        }
    }

    /// Maximum connections per open bundle.
    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }
}

impl ReaderSource for SqliteReaderSource {
    fn open_reader(&self, ctx: &QueryContext, dump_id: i64) -> Result<Option<Arc<dyn BundleReader>>> {
        ctx.check()?;
        let path = bundle_path(&self.dir, dump_id);
        if !path.is_file() {
            return Ok(None);
        }
        let reader = SqliteBundleReader::open(dump_id, &path, self.pool_size)?;
        Ok(Some(Arc::new(reader)))
    }
}

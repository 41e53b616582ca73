//! DuckDB table store shared by the SQL and CSV sinks
//!
//! Remote PostgreSQL, MySQL and SQLite databases are attached through
//! DuckDB extensions and made the default catalog, so every statement
//! below is written once in DuckDB's dialect.

use crate::error::{Error, Result};
use crate::feed::{batch_size, Cell, ColumnKind, FeedDescriptor, Row};
use crate::types::Dialect;
use chrono::{DateTime, Utc};
use duckdb::types::{ToSql, ToSqlOutput, Value};
use duckdb::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Table holding one watermark per feed and organisation
pub const WATERMARK_TABLE: &str = "_sync_watermarks";

/// How rows with an existing key are replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// `INSERT .. ON CONFLICT DO UPDATE`
    Upsert,
    /// Delete the keys, then insert
    DeleteInsert,
}

impl ToSql for Cell {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        let value = match self {
            Cell::Null => Value::Null,
            Cell::Text(s) => Value::Text(s.clone()),
            Cell::Int(i) => Value::BigInt(*i),
            Cell::Float(f) => Value::Double(*f),
            Cell::Bool(b) => Value::Boolean(*b),
            Cell::Timestamp(_) => Value::Text(self.to_string()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

/// Quote an identifier
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal
pub fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn placeholder(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Timestamp => "CAST(? AS TIMESTAMP)",
        _ => "?",
    }
}

fn timestamp_param(ts: DateTime<Utc>) -> String {
    Cell::Timestamp(ts).to_string()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::storage(format!("timestamp out of range: {micros}")))
}

/// A DuckDB connection and the write policy used on it
pub struct DuckStore {
    conn: Mutex<Connection>,
    mode: WriteMode,
    migrate: bool,
}

impl DuckStore {
    /// Open the target database for `dialect`
    pub fn open(dialect: Dialect, connection_string: &str, migrate: bool) -> Result<Self> {
        let (conn, mode) = match dialect {
            Dialect::Duckdb => {
                let conn = if connection_string.is_empty() || connection_string == ":memory:" {
                    Connection::open_in_memory()
                } else {
                    Connection::open(connection_string)
                }
                .map_err(|e| Error::config(format!("Failed to open DuckDB database: {e}")))?;
                (conn, WriteMode::Upsert)
            }
            Dialect::Postgres | Dialect::Mysql | Dialect::Sqlite => {
                let conn = Connection::open_in_memory()
                    .map_err(|e| Error::config(format!("Failed to create DuckDB connection: {e}")))?;
                attach(&conn, dialect, connection_string)?;
                (conn, WriteMode::DeleteInsert)
            }
            Dialect::Sqlserver => {
                return Err(Error::config(
                    "the sqlserver dialect is not supported by the embedded engine",
                ))
            }
        };

        Ok(Self {
            conn: Mutex::new(conn),
            mode,
            migrate,
        })
    }

    /// Open a local DuckDB file written with delete-then-insert
    pub fn open_file(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::config(format!("Failed to open {}: {e}", path.display())))?;
        Ok(Self {
            conn: Mutex::new(conn),
            mode: WriteMode::DeleteInsert,
            migrate: true,
        })
    }

    /// Private in-memory store
    pub fn in_memory(mode: WriteMode) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            mode,
            migrate: true,
        })
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    pub fn migrates(&self) -> bool {
        self.migrate
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::storage("database connection lock poisoned"))
    }

    /// Run `f` with exclusive use of the connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        f(&mut conn)
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Create the feed's table if missing, or check it exists when
    /// migrations are disabled
    pub fn ensure_table(&self, feed: &FeedDescriptor) -> Result<()> {
        let conn = self.lock()?;
        if self.migrate {
            conn.execute_batch(&create_table_sql(feed))?;
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {WATERMARK_TABLE} (
                    feed VARCHAR NOT NULL,
                    organisation_id VARCHAR NOT NULL,
                    modified_at TIMESTAMP NOT NULL,
                    PRIMARY KEY (feed, organisation_id)
                )"
            ))?;
            return Ok(());
        }

        conn.prepare(&format!("SELECT 1 FROM {} LIMIT 0", quote(feed.name)))
            .map(|_| ())
            .map_err(|e| {
                Error::storage(format!(
                    "table {} is unavailable and auto migration is disabled: {e}",
                    feed.name
                ))
            })
    }

    pub fn truncate(&self, feed: &FeedDescriptor) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(&format!("DELETE FROM {}", quote(feed.name)), [])?;
        Ok(())
    }

    // ========================================================================
    // Rows
    // ========================================================================

    /// Write rows by primary key, splitting them into statements that stay
    /// under `parameter_limit` placeholders
    pub fn write(&self, feed: &FeedDescriptor, rows: &[Row], parameter_limit: usize) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let size = batch_size(parameter_limit, feed.columns.len());
        let mut conn = self.lock()?;
        let mut written = 0;
        for chunk in rows.chunks(size) {
            written += match self.mode {
                WriteMode::Upsert => upsert(&conn, feed, chunk)?,
                WriteMode::DeleteInsert => delete_insert(&mut conn, feed, chunk)?,
            };
        }
        Ok(written)
    }

    /// Delete rows whose `column` is one of `values`
    pub fn delete_in(&self, feed: &FeedDescriptor, column: &str, values: &[String]) -> Result<usize> {
        if values.is_empty() {
            return Ok(0);
        }
        let conn = self.lock()?;
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            quote(feed.name),
            quote(column),
            vec!["?"; values.len()].join(", ")
        );
        Ok(conn.execute(&sql, params_from_iter(values.iter()))?)
    }

    /// Set `column` to `value` on rows whose single-column key is in `keys`
    pub fn update_in(
        &self,
        feed: &FeedDescriptor,
        keys: &[String],
        column: &str,
        value: &Cell,
    ) -> Result<usize> {
        let [key] = feed.primary_key.as_slice() else {
            return Err(Error::storage(format!(
                "cannot update {} by key: it has a composite primary key",
                feed.name
            )));
        };
        if keys.is_empty() {
            return Ok(0);
        }

        let conn = self.lock()?;
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} IN ({})",
            quote(feed.name),
            quote(column),
            quote(key),
            vec!["?"; keys.len()].join(", ")
        );
        let mut bound: Vec<&dyn ToSql> = Vec::with_capacity(keys.len() + 1);
        bound.push(value);
        bound.extend(keys.iter().map(|k| k as &dyn ToSql));
        Ok(conn.execute(&sql, bound.as_slice())?)
    }

    pub fn count(&self, feed: &FeedDescriptor) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote(feed.name)),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Copy a window of the ordered table to a CSV file with a header row
    pub fn copy_csv(&self, feed: &FeedDescriptor, path: &Path, limit: usize, offset: usize) -> Result<()> {
        let columns: Vec<String> = feed.columns.iter().map(|c| quote(c.name)).collect();
        let order = if feed.order.is_empty() {
            feed.primary_key.join(", ")
        } else {
            feed.order.to_string()
        };
        let sql = format!(
            "COPY (SELECT {} FROM {} ORDER BY {order} LIMIT {limit} OFFSET {offset}) TO {} (HEADER, DELIMITER ',')",
            columns.join(", "),
            quote(feed.name),
            literal(&path.to_string_lossy()),
        );
        let conn = self.lock()?;
        conn.execute_batch(&sql)?;
        Ok(())
    }

    // ========================================================================
    // Watermarks
    // ========================================================================

    /// Stored watermark for a feed and organisation
    pub fn watermark(&self, feed: &str, org_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT epoch_us(modified_at) FROM {WATERMARK_TABLE} WHERE feed = ? AND organisation_id = ?"
        ))?;
        let mut rows = stmt.query(params![feed, org_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(from_micros(row.get(0)?)?)),
            None => Ok(None),
        }
    }

    /// Latest value of the feed's modification column for an organisation
    pub fn column_max(&self, feed: &FeedDescriptor, org_id: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(column) = feed.modified_column else {
            return Ok(None);
        };
        let scoped = feed.column_index("organisation_id").is_some();
        let sql = format!(
            "SELECT epoch_us(MAX({})) FROM {}{}",
            quote(column),
            quote(feed.name),
            if scoped { " WHERE organisation_id = ?" } else { "" }
        );

        let conn = self.lock()?;
        let micros: Option<i64> = if scoped {
            conn.query_row(&sql, params![org_id], |row| row.get(0))?
        } else {
            conn.query_row(&sql, [], |row| row.get(0))?
        };
        micros.map(from_micros).transpose()
    }

    /// Move the watermark forward; an earlier `ts` leaves it unchanged
    pub fn advance_watermark(&self, feed: &str, org_id: &str, ts: DateTime<Utc>) -> Result<()> {
        if self.watermark(feed, org_id)?.is_some_and(|current| current >= ts) {
            return Ok(());
        }

        let conn = self.lock()?;
        conn.execute(
            &format!("DELETE FROM {WATERMARK_TABLE} WHERE feed = ? AND organisation_id = ?"),
            params![feed, org_id],
        )?;
        conn.execute(
            &format!(
                "INSERT INTO {WATERMARK_TABLE} (feed, organisation_id, modified_at) VALUES (?, ?, CAST(? AS TIMESTAMP))"
            ),
            params![feed, org_id, timestamp_param(ts)],
        )?;
        Ok(())
    }

    /// Forget every organisation's watermark for a feed
    pub fn clear_watermarks(&self, feed: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!("DELETE FROM {WATERMARK_TABLE} WHERE feed = ?"),
            params![feed],
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for DuckStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckStore")
            .field("mode", &self.mode)
            .field("migrate", &self.migrate)
            .finish_non_exhaustive()
    }
}

/// Attach an external database writable and make it the default catalog
fn attach(conn: &Connection, dialect: Dialect, connection_string: &str) -> Result<()> {
    let (extension, kind) = match dialect {
        Dialect::Postgres => ("postgres", "POSTGRES"),
        Dialect::Mysql => ("mysql", "MYSQL"),
        Dialect::Sqlite => ("sqlite", "SQLITE"),
        Dialect::Duckdb | Dialect::Sqlserver => {
            return Err(Error::config(format!("cannot attach a {dialect} database")))
        }
    };

    conn.execute_batch(&format!("INSTALL {extension}; LOAD {extension};"))
        .map_err(|e| Error::config(format!("Failed to load {extension} extension: {e}")))?;
    conn.execute_batch(&format!(
        "ATTACH {} AS target (TYPE {kind}); USE target;",
        literal(connection_string)
    ))
    .map_err(|e| Error::config(format!("Failed to attach {dialect} database: {e}")))?;
    Ok(())
}

/// `CREATE TABLE IF NOT EXISTS` for a feed
pub fn create_table_sql(feed: &FeedDescriptor) -> String {
    let mut defs: Vec<String> = feed
        .columns
        .iter()
        .map(|c| {
            let not_null = if feed.primary_key.contains(&c.name) {
                " NOT NULL"
            } else {
                ""
            };
            format!("{} {}{not_null}", quote(c.name), c.kind.sql_type())
        })
        .collect();
    if !feed.primary_key.is_empty() {
        let keys: Vec<String> = feed.primary_key.iter().map(|k| quote(k)).collect();
        defs.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(feed.name),
        defs.join(", ")
    )
}

fn values_clause(feed: &FeedDescriptor, rows: usize) -> String {
    let tuple = format!(
        "({})",
        feed.columns
            .iter()
            .map(|c| placeholder(c.kind))
            .collect::<Vec<_>>()
            .join(", ")
    );
    vec![tuple; rows].join(", ")
}

fn insert_sql(feed: &FeedDescriptor, rows: usize) -> String {
    let columns: Vec<String> = feed.columns.iter().map(|c| quote(c.name)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote(feed.name),
        columns.join(", "),
        values_clause(feed, rows)
    )
}

/// Insert-or-update statement for `rows` rows
pub fn upsert_sql(feed: &FeedDescriptor, rows: usize) -> String {
    let keys: Vec<String> = feed.primary_key.iter().map(|k| quote(k)).collect();
    let updates: Vec<String> = feed
        .value_columns()
        .map(|c| format!("{0} = excluded.{0}", quote(c.name)))
        .collect();
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };
    format!(
        "{} ON CONFLICT ({}) {action}",
        insert_sql(feed, rows),
        keys.join(", ")
    )
}

fn upsert(conn: &Connection, feed: &FeedDescriptor, rows: &[Row]) -> Result<usize> {
    let sql = upsert_sql(feed, rows.len());
    Ok(conn.execute(&sql, params_from_iter(rows.iter().flatten()))?)
}

fn delete_insert(conn: &mut Connection, feed: &FeedDescriptor, rows: &[Row]) -> Result<usize> {
    let keys = feed.key_indices();
    let tx = conn.transaction()?;

    if !keys.is_empty() {
        let matcher = format!(
            "({})",
            keys.iter()
                .map(|&i| format!("{} = ?", quote(feed.columns[i].name)))
                .collect::<Vec<_>>()
                .join(" AND ")
        );
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quote(feed.name),
            vec![matcher; rows.len()].join(" OR ")
        );
        let key_cells = rows.iter().flat_map(|row| keys.iter().map(move |&i| &row[i]));
        tx.execute(&sql, params_from_iter(key_cells))?;
    }

    let inserted = tx.execute(
        &insert_sql(feed, rows.len()),
        params_from_iter(rows.iter().flatten()),
    )?;
    tx.commit()?;
    Ok(inserted)
}

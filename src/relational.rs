//! Query backend: read-only access to SQLite database files.
//!
//! Queries are passed to the database engine exactly as given, and the engine is responsible for planning them.
//! Statements that would modify the database are rejected before execution.

use crate::error::{AccessError, Result};
use crate::slice::{Table, Value};
use crate::source::RowFilter;
use crate::utils;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, Row, Rows, Statement};

use log::debug;

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// A read-only connection to a SQLite database.
///
/// In multi-threaded applications, each thread should have its own connection.
///
/// # Examples
///
/// ```
/// use slice_base::RelationalSource;
/// use rusqlite::Connection;
///
/// let dir = tempfile::tempdir().unwrap();
/// let db_file = dir.path().join("genes.db");
/// let connection = Connection::open(&db_file).unwrap();
/// connection.execute_batch(
///     "CREATE TABLE genes (name TEXT, chrom TEXT, start INTEGER);
///      INSERT INTO genes VALUES ('BRCA1', 'chr17', 43044295), ('TP53', 'chr17', 7661779);"
/// ).unwrap();
/// drop(connection);
///
/// let source = RelationalSource::open(&db_file).unwrap();
/// assert!(source.list_tables().unwrap().contains("genes"));
/// let table = source.query("SELECT name FROM genes WHERE start < 10000000").unwrap();
/// assert_eq!(table.len(), 1);
/// assert_eq!(table.rows()[0][0].as_text(), Some("TP53"));
/// ```
#[derive(Debug)]
pub struct RelationalSource {
    connection: Connection,
    path: PathBuf,
}

impl RelationalSource {
    /// Opens a read-only connection to the database in the given file.
    ///
    /// The schema is read to make sure the file is a database.
    pub fn open<P: AsRef<Path>>(filename: P) -> Result<Self> {
        let path = filename.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let connection = Connection::open_with_flags(&path, flags).map_err(|x| AccessError::connection(&path, x))?;
        let objects: i64 = connection.query_row(
            "SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0)
        ).map_err(|x| AccessError::connection(&path, x))?;
        debug!("Opened {} with {} schema objects", path.display(), objects);
        Ok(RelationalSource { connection, path })
    }

    /// Returns the path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the filename reported by the database engine.
    pub fn filename(&self) -> Option<&str> {
        self.connection.path()
    }

    /// Returns the size of the database file in a human-readable format.
    pub fn file_size(&self) -> Option<String> {
        utils::file_size(&self.path)
    }

    fn query_error(&self, sql: &str, error: rusqlite::Error) -> AccessError {
        AccessError::query(&self.path, sql, error)
    }

    /// Returns the names of the user tables in the database.
    pub fn list_tables(&self) -> Result<BTreeSet<String>> {
        let sql = "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'";
        let mut statement = self.connection.prepare(sql).map_err(|x| self.query_error(sql, x))?;
        let names = statement.query_map([], |row| row.get::<_, String>(0)).map_err(|x| self.query_error(sql, x))?;
        let mut result = BTreeSet::new();
        for name in names {
            result.insert(name.map_err(|x| self.query_error(sql, x))?);
        }
        Ok(result)
    }

    /// Returns the declared columns of the table in order.
    ///
    /// Returns [`AccessError::Query`] if there is no such table.
    pub fn columns(&self, table: &str) -> Result<Vec<String>> {
        let sql = "SELECT name FROM pragma_table_info(?1) ORDER BY cid";
        let mut statement = self.connection.prepare(sql).map_err(|x| self.query_error(sql, x))?;
        let names = statement.query_map([table], |row| row.get::<_, String>(0)).map_err(|x| self.query_error(sql, x))?;
        let mut result = Vec::new();
        for name in names {
            result.push(name.map_err(|x| self.query_error(sql, x))?);
        }
        if result.is_empty() {
            return Err(AccessError::query(&self.path, sql, format!("no such table: {}", table)));
        }
        Ok(result)
    }

    // Prepares the statement and rejects it unless it is read-only.
    fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        let statement = self.connection.prepare(sql).map_err(|x| self.query_error(sql, x))?;
        if !statement.readonly() {
            return Err(AccessError::query(&self.path, sql, "Not a read-only statement"));
        }
        Ok(statement)
    }

    /// Executes the query and returns the result as a table.
    ///
    /// The statement is passed to the engine unchanged.
    /// Returns [`AccessError::Query`] with the message from the engine if the statement is invalid or not read-only.
    pub fn query(&self, sql: &str) -> Result<Table> {
        let mut query = self.query_rows(sql)?;
        let mut table = Table::new(query.columns().to_vec());
        for row in query.rows()? {
            table.push(row?);
        }
        debug!("Query returned {} rows from {}", table.len(), self.path.display());
        Ok(table)
    }

    /// Prepares the query for lazy iteration over the rows.
    pub fn query_rows(&self, sql: &str) -> Result<PreparedQuery<'_>> {
        let statement = self.prepare(sql)?;
        let columns = statement.column_names().into_iter().map(String::from).collect();
        Ok(PreparedQuery {
            path: &self.path,
            sql: sql.to_string(),
            columns,
            statement,
        })
    }

    /// Selects rows from a table.
    ///
    /// Builds `SELECT <columns> FROM <table> [WHERE <condition>] [LIMIT <limit>]` with quoted identifiers.
    /// The condition is passed to the engine as is.
    /// An empty column list selects all columns.
    pub fn select(&self, table: &str, filter: &RowFilter) -> Result<Table> {
        self.query(&select_statement(table, filter))
    }
}

/// Quotes an identifier for use in SQL.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn select_statement(table: &str, filter: &RowFilter) -> String {
    let columns = if filter.columns.is_empty() {
        String::from("*")
    } else {
        filter.columns.iter().map(|name| quote_identifier(name)).collect::<Vec<_>>().join(", ")
    };
    let mut sql = format!("SELECT {} FROM {}", columns, quote_identifier(table));
    if let Some(condition) = filter.condition.as_ref() {
        sql.push_str(" WHERE ");
        sql.push_str(condition);
    }
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    sql
}

//-----------------------------------------------------------------------------

/// A prepared read-only query.
///
/// Each call to [`PreparedQuery::rows`] executes the statement again.
pub struct PreparedQuery<'a> {
    path: &'a Path,
    sql: String,
    columns: Vec<String>,
    statement: Statement<'a>,
}

impl<'a> PreparedQuery<'a> {
    /// Returns the statement.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns the names of the result columns.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Executes the statement and returns an iterator over the rows.
    pub fn rows(&mut self) -> Result<RowIter<'_>> {
        let rows = self.statement.query([]).map_err(|x| AccessError::query(self.path, &self.sql, x))?;
        Ok(RowIter {
            rows,
            path: self.path,
            sql: &self.sql,
            width: self.columns.len(),
            done: false,
        })
    }
}

/// Iterator over the rows of a query result.
///
/// Iteration stops after the first error.
pub struct RowIter<'s> {
    rows: Rows<'s>,
    path: &'s Path,
    sql: &'s str,
    width: usize,
    done: bool,
}

fn row_values(row: &Row, width: usize) -> rusqlite::Result<Vec<Value>> {
    let mut result = Vec::with_capacity(width);
    for i in 0..width {
        let value: rusqlite::types::Value = row.get(i)?;
        result.push(Value::from(value));
    }
    Ok(result)
}

impl<'s> Iterator for RowIter<'s> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = match self.rows.next() {
            Ok(Some(row)) => row_values(row, self.width),
            Ok(None) => {
                self.done = true;
                return None;
            },
            Err(err) => Err(err),
        };
        if result.is_err() {
            self.done = true;
        }
        Some(result.map_err(|x| AccessError::query(self.path, self.sql, x)))
    }
}

//-----------------------------------------------------------------------------

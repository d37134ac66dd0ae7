//! Execution engine: runs a [`CompiledQuery`] against the backing store
//! and decodes rows into their domain-typed variants.
//!
//! Two entry points share the compiled SQL: [`PreparedQuery::stream`]
//! yields a forward-only, non-restartable [`RowStream`] holding exactly
//! one statement/cursor for its lifetime (released on every exit path by
//! Drop — exhaustion, early abort, or error), and
//! [`Executor::execute_eager`] materializes everything into an
//! [`EagerResult`].
//!
//! Rows are decoded positionally through the compiled column mapping;
//! column names are never consulted at runtime.

use std::time::Instant;

use rusqlite::{params_from_iter, Connection, Row, Rows, Statement};
use serde::Serialize;

use crate::error::{AqlError, Result};
use crate::model::AqlDomain;
use crate::sqlgen::{CompiledQuery, ResolvedColumn};

/// Runs compiled queries over one borrowed connection. The connection
/// pool itself is an external collaborator.
pub struct Executor<'conn> {
    conn: &'conn Connection,
    deadline: Option<Instant>,
}

impl<'conn> Executor<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            deadline: None,
        }
    }

    /// Streams abort with [`AqlError::DeadlineExceeded`] once `deadline`
    /// passes; checked between rows, so a query never runs unbounded.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Prepares the statement for lazy execution.
    pub fn prepare<'q>(&self, compiled: &'q CompiledQuery) -> Result<PreparedQuery<'conn, 'q>> {
        let stmt = self
            .conn
            .prepare(&compiled.sql)
            .map_err(|source| AqlError::Execution {
                sql: compiled.sql.clone(),
                source,
            })?;
        Ok(PreparedQuery {
            stmt,
            plan: compiled,
            deadline: self.deadline,
        })
    }

    /// Fully materializes the result set. Per-row decoding failures are
    /// aggregated into a single error instead of aborting on the first.
    pub fn execute_eager(&self, compiled: &CompiledQuery) -> Result<EagerResult> {
        let mut prepared = self.prepare(compiled)?;
        let mut stream = prepared.stream()?;
        let mut rows = Vec::new();
        let mut decode_failures: Vec<AqlError> = Vec::new();
        loop {
            match stream.next_row() {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break,
                Err(err @ AqlError::ResultDecoding { .. }) => decode_failures.push(err),
                Err(err) => return Err(err),
            }
        }
        if let Some(first) = decode_failures.first() {
            return Err(AqlError::ResultDecoding {
                index: 0,
                field: String::new(),
                message: format!(
                    "{} row(s) failed to decode; first: {}",
                    decode_failures.len(),
                    first
                ),
            });
        }
        Ok(EagerResult {
            total: rows.len() as u64,
            rows,
        })
    }
}

/// A statement bound to one connection, ready to open a cursor.
pub struct PreparedQuery<'conn, 'q> {
    stmt: Statement<'conn>,
    plan: &'q CompiledQuery,
    deadline: Option<Instant>,
}

impl<'conn, 'q> PreparedQuery<'conn, 'q> {
    /// Opens the cursor. The returned stream is forward-only; dropping it
    /// resets the statement, releasing the cursor on every exit path.
    pub fn stream(&mut self) -> Result<RowStream<'_, 'q>> {
        let plan = self.plan;
        let params = bind_values(plan);
        let rows = self
            .stmt
            .query(params_from_iter(params))
            .map_err(|source| AqlError::Execution {
                sql: plan.sql.clone(),
                source,
            })?;
        Ok(RowStream {
            rows,
            plan,
            deadline: self.deadline,
            yielded: 0,
        })
    }
}

/// Lazy, forward-only, non-restartable sequence of decoded rows.
pub struct RowStream<'stmt, 'q> {
    rows: Rows<'stmt>,
    plan: &'q CompiledQuery,
    deadline: Option<Instant>,
    yielded: u64,
}

impl<'stmt, 'q> RowStream<'stmt, 'q> {
    /// Returns the next decoded row, `None` on exhaustion.
    pub fn next_row(&mut self) -> Result<Option<AqlRow>> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(AqlError::DeadlineExceeded {
                    rows: self.yielded,
                });
            }
        }
        match self.rows.next() {
            Ok(Some(row)) => {
                let decoded = decode_row(row, self.plan)?;
                self.yielded += 1;
                Ok(Some(decoded))
            }
            Ok(None) => Ok(None),
            Err(source) => Err(AqlError::Execution {
                sql: self.plan.sql.clone(),
                source,
            }),
        }
    }

    /// Rows yielded so far.
    pub fn yielded(&self) -> u64 {
        self.yielded
    }
}

/// Materialized result: total count plus random-access rows.
#[derive(Debug, Clone, Serialize)]
pub struct EagerResult {
    pub total: u64,
    pub rows: Vec<AqlRow>,
}

impl EagerResult {
    pub fn count(&self) -> u64 {
        self.total
    }

    pub fn row(&self, index: usize) -> Option<&AqlRow> {
        self.rows.get(index)
    }
}

/// One decoded output record, keyed by domain.
#[derive(Debug, Clone, Serialize)]
pub enum AqlRow {
    Item(ItemRow),
    Entry(EntryRow),
    Stat(StatRow),
    Property(PropertyRow),
}

/// Fields are optional because the projection decides which come back.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ItemRow {
    pub repo: Option<String>,
    pub path: Option<String>,
    pub name: Option<String>,
    pub size: Option<i64>,
    pub modified: Option<i64>,
    pub downloads: Option<i64>,
    pub last_downloaded: Option<i64>,
    pub property_key: Option<String>,
    pub property_value: Option<String>,
    pub entry_name: Option<String>,
    pub entry_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EntryRow {
    pub entry_name: Option<String>,
    pub entry_path: Option<String>,
    pub item_repo: Option<String>,
    pub item_path: Option<String>,
    pub item_name: Option<String>,
    pub item_size: Option<i64>,
    pub item_modified: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatRow {
    pub downloads: Option<i64>,
    pub last_downloaded: Option<i64>,
    pub item_repo: Option<String>,
    pub item_path: Option<String>,
    pub item_name: Option<String>,
    pub item_size: Option<i64>,
    pub item_modified: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PropertyRow {
    pub key: Option<String>,
    pub value: Option<String>,
    pub item_repo: Option<String>,
    pub item_path: Option<String>,
    pub item_name: Option<String>,
    pub item_size: Option<i64>,
    pub item_modified: Option<i64>,
}

fn decode_row(row: &Row<'_>, plan: &CompiledQuery) -> Result<AqlRow> {
    match plan.domain {
        AqlDomain::Items => {
            let mut out = ItemRow::default();
            for (index, col) in plan.columns.iter().enumerate() {
                match col.field.as_str() {
                    "repo" => out.repo = get_str(row, index, col)?,
                    "path" => out.path = get_str(row, index, col)?,
                    "name" => out.name = get_str(row, index, col)?,
                    "size" => out.size = get_int(row, index, col)?,
                    "modified" => out.modified = get_int(row, index, col)?,
                    "stat.downloads" => out.downloads = get_int(row, index, col)?,
                    "stat.last_downloaded" => out.last_downloaded = get_int(row, index, col)?,
                    "property.key" => out.property_key = get_str(row, index, col)?,
                    "property.value" => out.property_value = get_str(row, index, col)?,
                    "archive.entry_name" => out.entry_name = get_str(row, index, col)?,
                    "archive.entry_path" => out.entry_path = get_str(row, index, col)?,
                    _ => return Err(no_slot(index, col)),
                }
            }
            Ok(AqlRow::Item(out))
        }
        AqlDomain::Entries => {
            let mut out = EntryRow::default();
            for (index, col) in plan.columns.iter().enumerate() {
                match col.field.as_str() {
                    "entry_name" => out.entry_name = get_str(row, index, col)?,
                    "entry_path" => out.entry_path = get_str(row, index, col)?,
                    "item.repo" => out.item_repo = get_str(row, index, col)?,
                    "item.path" => out.item_path = get_str(row, index, col)?,
                    "item.name" => out.item_name = get_str(row, index, col)?,
                    "item.size" => out.item_size = get_int(row, index, col)?,
                    "item.modified" => out.item_modified = get_int(row, index, col)?,
                    _ => return Err(no_slot(index, col)),
                }
            }
            Ok(AqlRow::Entry(out))
        }
        AqlDomain::Statistics => {
            let mut out = StatRow::default();
            for (index, col) in plan.columns.iter().enumerate() {
                match col.field.as_str() {
                    "downloads" => out.downloads = get_int(row, index, col)?,
                    "last_downloaded" => out.last_downloaded = get_int(row, index, col)?,
                    "item.repo" => out.item_repo = get_str(row, index, col)?,
                    "item.path" => out.item_path = get_str(row, index, col)?,
                    "item.name" => out.item_name = get_str(row, index, col)?,
                    "item.size" => out.item_size = get_int(row, index, col)?,
                    "item.modified" => out.item_modified = get_int(row, index, col)?,
                    _ => return Err(no_slot(index, col)),
                }
            }
            Ok(AqlRow::Stat(out))
        }
        AqlDomain::Properties => {
            let mut out = PropertyRow::default();
            for (index, col) in plan.columns.iter().enumerate() {
                match col.field.as_str() {
                    "key" => out.key = get_str(row, index, col)?,
                    "value" => out.value = get_str(row, index, col)?,
                    "item.repo" => out.item_repo = get_str(row, index, col)?,
                    "item.path" => out.item_path = get_str(row, index, col)?,
                    "item.name" => out.item_name = get_str(row, index, col)?,
                    "item.size" => out.item_size = get_int(row, index, col)?,
                    "item.modified" => out.item_modified = get_int(row, index, col)?,
                    _ => return Err(no_slot(index, col)),
                }
            }
            Ok(AqlRow::Property(out))
        }
    }
}

fn get_str(row: &Row<'_>, index: usize, col: &ResolvedColumn) -> Result<Option<String>> {
    row.get::<_, Option<String>>(index)
        .map_err(|e| decode_err(index, col, e))
}

fn get_int(row: &Row<'_>, index: usize, col: &ResolvedColumn) -> Result<Option<i64>> {
    row.get::<_, Option<i64>>(index)
        .map_err(|e| decode_err(index, col, e))
}

fn decode_err(index: usize, col: &ResolvedColumn, e: rusqlite::Error) -> AqlError {
    AqlError::ResultDecoding {
        index,
        field: col.field.clone(),
        message: e.to_string(),
    }
}

fn no_slot(index: usize, col: &ResolvedColumn) -> AqlError {
    AqlError::ResultDecoding {
        index,
        field: col.field.clone(),
        message: "field has no slot in this domain's row shape".to_string(),
    }
}

/// Converts sea-query bound values to rusqlite parameters.
fn bind_values(plan: &CompiledQuery) -> Vec<rusqlite::types::Value> {
    use rusqlite::types::Value as Sql;
    plan.params
        .0
        .iter()
        .map(|v| match v {
            sea_query::Value::Bool(Some(b)) => Sql::Integer(*b as i64),
            sea_query::Value::Int(Some(n)) => Sql::Integer(*n as i64),
            sea_query::Value::BigInt(Some(n)) => Sql::Integer(*n),
            sea_query::Value::Unsigned(Some(n)) => Sql::Integer(*n as i64),
            // Saturate rather than wrap: a wrapped negative OFFSET would
            // make SQLite ignore the clause entirely.
            sea_query::Value::BigUnsigned(Some(n)) => {
                Sql::Integer(i64::try_from(*n).unwrap_or(i64::MAX))
            }
            sea_query::Value::Double(Some(f)) => Sql::Real(*f),
            sea_query::Value::String(Some(s)) => Sql::Text((**s).clone()),
            _ => Sql::Null,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AqlQueryBuilder, Criteria, SortDirection};
    use crate::sqlgen::generate;
    use std::time::Duration;

    fn fixture() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, repo TEXT, path TEXT, name TEXT, size INTEGER, modified INTEGER);
             CREATE TABLE stats (item_id INTEGER, downloads INTEGER, last_downloaded INTEGER);
             INSERT INTO items VALUES (1, 'repo1', 'org/a', 'a.jar', 10, 1000);
             INSERT INTO items VALUES (2, 'repo1', 'org/b', 'b.jar', 20, 2000);
             INSERT INTO items VALUES (3, 'repo2', 'org/c', 'c.jar', 30, 3000);
             INSERT INTO stats VALUES (1, 7, 500);",
        )
        .unwrap();
        conn
    }

    fn items_by_repo(repo: &str) -> CompiledQuery {
        let query = AqlQueryBuilder::new(crate::model::AqlDomain::Items)
            .criteria(Criteria::eq("repo", repo))
            .sort_by("name", SortDirection::Asc)
            .build();
        generate(&query).unwrap()
    }

    #[test]
    fn test_stream_yields_decoded_rows() {
        let conn = fixture();
        let compiled = items_by_repo("repo1");
        let executor = Executor::new(&conn);
        let mut prepared = executor.prepare(&compiled).unwrap();
        let mut stream = prepared.stream().unwrap();

        let mut names = Vec::new();
        while let Some(row) = stream.next_row().unwrap() {
            match row {
                AqlRow::Item(item) => names.push(item.name.unwrap()),
                other => panic!("expected item row, got {:?}", other),
            }
        }
        assert_eq!(names, vec!["a.jar", "b.jar"]);
        assert_eq!(stream.yielded(), 2);
    }

    #[test]
    fn test_early_drop_releases_cursor() {
        let conn = fixture();
        let compiled = items_by_repo("repo1");
        let executor = Executor::new(&conn);
        {
            let mut prepared = executor.prepare(&compiled).unwrap();
            let mut stream = prepared.stream().unwrap();
            let _ = stream.next_row().unwrap();
            // dropped mid-iteration
        }
        // The connection is reusable immediately.
        let eager = executor.execute_eager(&compiled).unwrap();
        assert_eq!(eager.count(), 2);
    }

    #[test]
    fn test_eager_count_and_indexed_access() {
        let conn = fixture();
        let compiled = items_by_repo("repo1");
        let result = Executor::new(&conn).execute_eager(&compiled).unwrap();
        assert_eq!(result.count(), 2);
        assert!(result.row(0).is_some());
        assert!(result.row(2).is_none());
    }

    #[test]
    fn test_deadline_exceeded() {
        let conn = fixture();
        let compiled = items_by_repo("repo1");
        let executor =
            Executor::new(&conn).with_deadline(Instant::now() - Duration::from_secs(1));
        let mut prepared = executor.prepare(&compiled).unwrap();
        let mut stream = prepared.stream().unwrap();
        match stream.next_row() {
            Err(AqlError::DeadlineExceeded { rows }) => assert_eq!(rows, 0),
            other => panic!("expected DeadlineExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_execution_error_carries_sql() {
        let conn = Connection::open_in_memory().unwrap(); // no tables
        let compiled = items_by_repo("repo1");
        match Executor::new(&conn).prepare(&compiled) {
            Err(AqlError::Execution { sql, .. }) => assert_eq!(sql, compiled.sql),
            other => panic!("expected Execution error, got {:?}", other.map(|_| ())),
        };
    }

    #[test]
    fn test_eager_aggregates_decode_failures() {
        let conn = fixture();
        // A BLOB where the row shape expects an integer size.
        conn.execute(
            "INSERT INTO items VALUES (4, 'repo3', 'org/d', 'd.jar', x'DEADBEEF', 4000)",
            [],
        )
        .unwrap();
        let compiled = items_by_repo("repo3");
        match Executor::new(&conn).execute_eager(&compiled) {
            Err(AqlError::ResultDecoding { message, .. }) => {
                assert!(
                    message.contains("1 row(s) failed to decode"),
                    "{}",
                    message
                );
            }
            other => panic!("expected ResultDecoding, got {:?}", other),
        }
    }

    #[test]
    fn test_huge_offset_saturates_instead_of_wrapping() {
        let query = AqlQueryBuilder::new(crate::model::AqlDomain::Items)
            .limit(10)
            .offset(u64::MAX)
            .build();
        let compiled = generate(&query).unwrap();
        let params = bind_values(&compiled);
        assert!(params.contains(&rusqlite::types::Value::Integer(i64::MAX)));

        let conn = fixture();
        let result = Executor::new(&conn).execute_eager(&compiled).unwrap();
        assert_eq!(result.count(), 0);
    }

    #[test]
    fn test_null_join_columns_decode_as_none() {
        let conn = fixture();
        let query = AqlQueryBuilder::new(crate::model::AqlDomain::Items)
            .field("name")
            .field("stat.downloads")
            .criteria(Criteria::eq("repo", "repo2"))
            .build();
        let compiled = generate(&query).unwrap();
        let result = Executor::new(&conn).execute_eager(&compiled).unwrap();
        assert_eq!(result.count(), 1);
        match result.row(0).unwrap() {
            AqlRow::Item(item) => {
                assert_eq!(item.name.as_deref(), Some("c.jar"));
                assert_eq!(item.downloads, None);
            }
            other => panic!("expected item row, got {:?}", other),
        }
    }
}

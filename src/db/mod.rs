mod schema;
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

use anyhow::Result;
use indexmap::IndexMap;
use std::fmt;

use crate::config::DatabaseConfig;
#[cfg(feature = "postgres")]
use crate::config::DatabaseType;
use crate::error::DbError;
use crate::schema::{Schema, TableDef};

pub use schema::{create_table_sql, drop_table_sql, insert_sql};

/// A single SQL value, as bound into statements and read back out of them.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            SqlValue::Real(v) => Some(*v as i64),
            SqlValue::Text(s) => s.parse().ok(),
            SqlValue::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => Ok(()),
            SqlValue::Integer(v) => write!(f, "{}", v),
            SqlValue::Real(v) => write!(f, "{}", v),
            SqlValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One row headed for a table, keyed by column name. Keys the target table
/// does not declare are ignored on insert; missing keys insert NULL.
pub type Row = IndexMap<String, SqlValue>;

/// Rows returned by a query, in the order the statement produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The single integer produced by an aggregate query.
    pub fn scalar(&self) -> Option<i64> {
        self.rows.first().and_then(|r| r.first()).and_then(SqlValue::as_i64)
    }

    /// Values of one column across every row.
    pub fn column(&self, name: &str) -> Option<Vec<&SqlValue>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }
}

/// Placeholder style of the connected backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Placeholder for the `n`th (1-based) bound parameter.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${}", n),
        }
    }
}

/// Double-quote an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Macro to dispatch a method call to the active backend variant.
macro_rules! dispatch {
    ($self:expr, $method:ident()) => {
        match &$self.inner {
            DatabaseInner::Sqlite(db) => db.$method(),
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(db) => db.$method(),
        }
    };
    ($self:expr, $method:ident($($arg:expr),+ $(,)?)) => {
        match &$self.inner {
            DatabaseInner::Sqlite(db) => db.$method($($arg),+),
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(db) => db.$method($($arg),+),
        }
    };
}

enum DatabaseInner {
    Sqlite(sqlite::SqliteDb),
    #[cfg(feature = "postgres")]
    Postgres(postgres::PgDb),
}

/// Shared handle to the relational store. Cheap to share behind an `Arc`;
/// every method takes `&self`.
pub struct Database {
    inner: DatabaseInner,
    foreign_keys: bool,
}

impl Database {
    /// Open a database connection based on the provided configuration.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        #[cfg(feature = "postgres")]
        {
            if config.backend == DatabaseType::Postgresql {
                let url = config.postgresql_url.as_deref()
                    .ok_or_else(|| anyhow::anyhow!("PostgreSQL URL not configured"))?;
                let pool_size = config.pool_size.unwrap_or(10);
                let pg = postgres::PgDb::open(url, pool_size)?;
                tracing::info!("Connected to PostgreSQL (pool size {})", pool_size);
                return Ok(Self {
                    inner: DatabaseInner::Postgres(pg),
                    foreign_keys: config.foreign_keys,
                });
            }
        }

        let db = sqlite::SqliteDb::open(&config.sqlite_path, config.foreign_keys)?;
        tracing::info!("Opened SQLite database at {:?}", config.sqlite_path);
        Ok(Self {
            inner: DatabaseInner::Sqlite(db),
            foreign_keys: config.foreign_keys,
        })
    }

    /// A private SQLite database, used by tests and dry runs.
    pub fn open_in_memory(foreign_keys: bool) -> Result<Self, DbError> {
        let db = sqlite::SqliteDb::open_in_memory(foreign_keys)?;
        Ok(Self {
            inner: DatabaseInner::Sqlite(db),
            foreign_keys,
        })
    }

    pub fn dialect(&self) -> Dialect {
        match &self.inner {
            DatabaseInner::Sqlite(_) => Dialect::Sqlite,
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(_) => Dialect::Postgres,
        }
    }

    pub fn foreign_keys(&self) -> bool {
        self.foreign_keys
    }

    // ========================================================================
    // Table lifecycle
    // ========================================================================

    /// Create every table of `schema` that does not exist yet, parents first.
    /// With `drop_existing`, the schema's tables are dropped (children first)
    /// and recreated empty.
    pub fn create_tables(&self, schema: &Schema, drop_existing: bool) -> Result<(), DbError> {
        if drop_existing {
            self.drop_tables(schema)?;
        }
        let mut ddl = String::new();
        for table in schema.tables() {
            ddl.push_str(&create_table_sql(table, self.foreign_keys));
        }
        dispatch!(self, execute_batch(&ddl))?;
        tracing::debug!("Ensured {} tables", schema.tables().len());
        Ok(())
    }

    /// Drop every table of `schema`, children first.
    pub fn drop_tables(&self, schema: &Schema) -> Result<(), DbError> {
        let ddl: String = schema
            .tables()
            .iter()
            .rev()
            .map(|t| drop_table_sql(&t.name))
            .collect();
        dispatch!(self, execute_batch(&ddl))?;
        tracing::info!("Dropped {} tables", schema.tables().len());
        Ok(())
    }

    /// Column names of a table as the database reports them. Empty when the
    /// table does not exist.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>, DbError> {
        dispatch!(self, table_columns(table))
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, DbError> {
        Ok(!self.table_columns(table)?.is_empty())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert all rows in a single transaction. Any failure rolls back the
    /// whole batch.
    pub fn bulk_insert(&self, table: &TableDef, rows: &[Row]) -> Result<usize, DbError> {
        if rows.is_empty() {
            return Ok(0);
        }
        dispatch!(self, bulk_insert(table, rows))
    }

    pub fn insert_row(&self, table: &TableDef, row: &Row) -> Result<(), DbError> {
        self.bulk_insert(table, std::slice::from_ref(row)).map(|_| ())
    }

    /// Copy every row of `live` into `history`, then drop `live`, in one
    /// transaction. Only columns both tables declare are copied. Returns the
    /// number of rows moved.
    pub fn move_to_history(&self, live: &TableDef, history: &TableDef) -> Result<usize, DbError> {
        let columns: Vec<String> = history
            .column_names()
            .filter(|c| live.has_column(c))
            .map(quote_ident)
            .collect();
        let columns = columns.join(", ");
        let copy = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            quote_ident(&history.name),
            columns,
            columns,
            quote_ident(&live.name)
        );
        let drop = format!("DROP TABLE {}", quote_ident(&live.name));
        let moved = dispatch!(self, copy_and_drop(&copy, &drop))?;
        tracing::info!("Moved {} rows from {} to {}", moved, live.name, history.name);
        Ok(moved)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Run a rendered statement with its bound parameters.
    pub fn query(&self, sql: &str, params: &[SqlValue]) -> Result<ResultSet, DbError> {
        tracing::debug!(sql, params = params.len(), "Running query");
        dispatch!(self, query(sql, params))
    }

    /// Largest value of an integer column, `None` for an empty table.
    pub fn max_integer(&self, table: &str, column: &str) -> Result<Option<i64>, DbError> {
        let sql = format!(
            "SELECT MAX({}) AS \"max\" FROM {}",
            quote_ident(column),
            quote_ident(table)
        );
        Ok(self.query(&sql, &[])?.scalar())
    }
}

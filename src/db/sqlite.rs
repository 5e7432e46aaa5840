//! SQLite backend implementation.

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{insert_sql, Dialect, ResultSet, Row, SqlValue};
use crate::error::DbError;
use crate::schema::TableDef;

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    pub fn open(path: &Path, foreign_keys: bool) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("SQLite journal mode: {}", mode);
        Ok(Self::configure(conn, foreign_keys)?)
    }

    pub fn open_in_memory(foreign_keys: bool) -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn, foreign_keys)
    }

    fn configure(conn: Connection, foreign_keys: bool) -> Result<Self, DbError> {
        let pragma = if foreign_keys {
            "PRAGMA foreign_keys = ON;"
        } else {
            "PRAGMA foreign_keys = OFF;"
        };
        conn.execute_batch(pragma)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    pub fn table_columns(&self, table: &str) -> Result<Vec<String>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
        let columns = stmt
            .query_map([table], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    pub fn bulk_insert(&self, table: &TableDef, rows: &[Row]) -> Result<usize, DbError> {
        let sql = insert_sql(table, Dialect::Sqlite);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                let values = table
                    .column_names()
                    .map(|c| row.get(c).unwrap_or(&SqlValue::Null));
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn copy_and_drop(&self, copy: &str, drop: &str) -> Result<usize, DbError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let moved = tx.execute(copy, [])?;
        tx.execute(drop, [])?;
        tx.commit()?;
        Ok(moved)
    }

    pub fn query(&self, sql: &str, params: &[SqlValue]) -> Result<ResultSet, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(from_value_ref(row.get_ref(idx)?));
            }
            rows.push(values);
        }

        Ok(ResultSet { columns, rows })
    }
}

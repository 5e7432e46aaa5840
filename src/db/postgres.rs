//! PostgreSQL backend implementation.

use postgres::types::{ToSql, Type};
use postgres::NoTls;
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;

use super::{insert_sql, Dialect, ResultSet, Row, SqlValue};
use crate::error::DbError;
use crate::schema::{ColumnType, TableDef};

type Param = Box<dyn ToSql + Sync>;

/// Box a value for binding. Query parameters carry their own type; inserts
/// are coerced to the declared column type so NULLs are typed correctly.
fn to_param(value: &SqlValue, column: Option<ColumnType>) -> Param {
    match (column, value) {
        (Some(ColumnType::Integer), SqlValue::Null) => Box::new(None::<i64>),
        (Some(ColumnType::Real), SqlValue::Null) => Box::new(None::<f64>),
        (_, SqlValue::Null) => Box::new(None::<String>),
        (Some(ColumnType::Integer), v) => Box::new(v.as_i64()),
        (Some(ColumnType::Real), SqlValue::Integer(v)) => Box::new(*v as f64),
        (Some(ColumnType::Real), SqlValue::Text(s)) => Box::new(s.parse::<f64>().ok()),
        (Some(ColumnType::Text), v) => Box::new(v.to_string()),
        (_, SqlValue::Integer(v)) => Box::new(*v),
        (_, SqlValue::Real(v)) => Box::new(*v),
        (_, SqlValue::Text(s)) => Box::new(s.clone()),
    }
}

fn read_column(row: &postgres::Row, idx: usize) -> Result<SqlValue, DbError> {
    let ty = row.columns()[idx].type_();
    let value: SqlValue = if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.into()
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?.map(i64::from).into()
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?.map(i64::from).into()
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.into()
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?.map(f64::from).into()
    } else {
        row.try_get::<_, Option<String>>(idx)?.into()
    };
    Ok(value)
}

pub struct PgDb {
    pool: Pool<PostgresConnectionManager<NoTls>>,
}

impl PgDb {
    pub fn open(url: &str, pool_size: u32) -> anyhow::Result<Self> {
        let manager = PostgresConnectionManager::new(url.parse()?, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)?;
        Ok(Self { pool })
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        let mut client = self.pool.get()?;
        client.batch_execute(sql)?;
        Ok(())
    }

    pub fn table_columns(&self, table: &str) -> Result<Vec<String>, DbError> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
            &[&table],
        )?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    pub fn bulk_insert(&self, table: &TableDef, rows: &[Row]) -> Result<usize, DbError> {
        let sql = insert_sql(table, Dialect::Postgres);
        let mut client = self.pool.get()?;
        let mut tx = client.transaction()?;
        let stmt = tx.prepare(&sql)?;
        for row in rows {
            let params: Vec<Param> = table
                .columns
                .iter()
                .map(|c| to_param(row.get(&c.name).unwrap_or(&SqlValue::Null), Some(c.ty)))
                .collect();
            let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref()).collect();
            tx.execute(&stmt, &refs)?;
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn copy_and_drop(&self, copy: &str, drop: &str) -> Result<usize, DbError> {
        let mut client = self.pool.get()?;
        let mut tx = client.transaction()?;
        let moved = tx.execute(copy, &[])?;
        tx.execute(drop, &[])?;
        tx.commit()?;
        Ok(moved as usize)
    }

    pub fn query(&self, sql: &str, params: &[SqlValue]) -> Result<ResultSet, DbError> {
        let mut client = self.pool.get()?;
        let stmt = client.prepare(sql)?;
        let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();

        let boxed: Vec<Param> = params.iter().map(|p| to_param(p, None)).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|p| p.as_ref()).collect();

        let mut rows = Vec::new();
        for row in client.query(&stmt, &refs)? {
            let values = (0..columns.len())
                .map(|idx| read_column(&row, idx))
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(values);
        }

        Ok(ResultSet { columns, rows })
    }
}

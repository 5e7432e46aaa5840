//! Renders a parsed filter and its table resolution into one SELECT.

use crate::db::{quote_ident, Dialect, SqlValue};
use crate::error::QueryError;
use crate::schema::{ColumnDef, Schema, TableDef};

use super::filter::{Filter, Operand, Predicate};
use super::resolver::Resolution;

/// A zero-indexed page of a fixed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    /// Rejects pages whose row offset would not fit a SQL integer.
    pub fn new(number: usize, size: usize) -> Result<Self, QueryError> {
        let fits = |n: usize| i64::try_from(n).is_ok();
        match number.checked_mul(size) {
            Some(offset) if fits(offset) && fits(size) => Ok(Self { number, size }),
            _ => Err(QueryError::InvalidPage {
                value: number.to_string(),
            }),
        }
    }

    pub fn offset(&self) -> usize {
        self.number.saturating_mul(self.size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Full rows; ordered and sliced when a page is given.
    Rows(Option<Page>),
    /// A single row-count aggregate.
    Count,
}

/// SQL text with its bound parameters, ready to hand to the database.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
    /// Output column names, in select order.
    pub columns: Vec<String>,
}

pub struct QueryBuilder<'a> {
    schema: &'a Schema,
    primary: &'a TableDef,
    dialect: Dialect,
    params: Vec<SqlValue>,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(schema: &'a Schema, primary: &'a TableDef, dialect: Dialect) -> Self {
        Self {
            schema,
            primary,
            dialect,
            params: Vec::new(),
        }
    }

    pub fn build(mut self, filter: &Filter, resolution: &Resolution, shape: Shape) -> Result<Statement, QueryError> {
        let primary = self.primary;

        let mut columns: Vec<String> = primary.column_names().map(String::from).collect();
        let mut select: Vec<String> = columns
            .iter()
            .map(|c| qualified(&primary.name, c, true))
            .collect();
        for (field, table) in &resolution.fields {
            if *table != primary.name {
                select.push(qualified(table, field, true));
                columns.push(field.clone());
            }
        }

        let mut joined = Vec::with_capacity(resolution.joins.len());
        let mut from = quote_ident(&primary.name);
        for name in &resolution.joins {
            let table = self.table(name)?;
            let on = self
                .schema
                .relationship_between(&primary.name, name)
                .ok_or_else(|| QueryError::JoinConfiguration {
                    primary: primary.name.clone(),
                    table: name.clone(),
                })?;
            let on: Vec<String> = on
                .iter()
                .map(|(left, right)| {
                    format!("{} = {}", qualified(&primary.name, left, false), qualified(name, right, false))
                })
                .collect();
            from.push_str(&format!(" JOIN {} ON {}", quote_ident(name), on.join(" AND ")));
            joined.push(table);
        }

        let mut conditions = Vec::new();
        for (field, predicates) in filter.predicates() {
            let table_name = resolution
                .table_of(field)
                .ok_or_else(|| QueryError::UnresolvedField {
                    fields: vec![field.clone()],
                })?;
            let column = self
                .table(table_name)?
                .column(field)
                .ok_or_else(|| QueryError::UnresolvedField {
                    fields: vec![field.clone()],
                })?;
            for predicate in predicates {
                conditions.push(self.condition(table_name, column, predicate)?);
            }
        }

        let mut sql = match shape {
            Shape::Count => format!("SELECT COUNT(*) AS \"count\" FROM {}", from),
            Shape::Rows(_) => format!("SELECT {} FROM {}", select.join(", "), from),
        };
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if let Shape::Rows(Some(page)) = shape {
            let mut order: Vec<String> = primary
                .primary_key
                .iter()
                .map(|c| qualified(&primary.name, c, false))
                .collect();
            for table in &joined {
                order.extend(table.primary_key.iter().map(|c| qualified(&table.name, c, false)));
            }
            sql.push_str(&format!(
                " ORDER BY {} LIMIT {} OFFSET {}",
                order.join(", "),
                page.size,
                page.offset()
            ));
        }

        let columns = match shape {
            Shape::Count => vec!["count".to_string()],
            Shape::Rows(_) => columns,
        };

        Ok(Statement {
            sql,
            params: self.params,
            columns,
        })
    }

    fn table(&self, name: &str) -> Result<&'a TableDef, QueryError> {
        self.schema.table(name).ok_or_else(|| QueryError::JoinConfiguration {
            primary: self.primary.name.clone(),
            table: name.to_string(),
        })
    }

    fn condition(&mut self, table: &str, column: &ColumnDef, predicate: &Predicate) -> Result<String, QueryError> {
        let mismatch = || QueryError::TypeMismatch {
            field: column.name.clone(),
            column_type: column.ty.name(),
            operator: predicate.operator(),
        };
        if predicate.requires_numeric() && !column.ty.is_numeric() {
            return Err(mismatch());
        }
        if column.ty.is_numeric() && !predicate.operands().iter().all(|o| o.is_numeric()) {
            return Err(mismatch());
        }

        let target = qualified(table, &column.name, false);
        let numeric = column.ty.is_numeric();
        Ok(match predicate {
            Predicate::Eq(o) => format!("{} = {}", target, self.bind(o, numeric)),
            Predicate::Compare(c, o) => format!("{} {} {}", target, c.sql(), self.bind(o, numeric)),
            Predicate::In(values) => {
                let list: Vec<String> = values.iter().map(|o| self.bind(o, numeric)).collect();
                format!("{} IN ({})", target, list.join(", "))
            }
            Predicate::Range(low, high) => {
                let low = self.bind(low, numeric);
                let high = self.bind(high, numeric);
                format!("{} BETWEEN {} AND {}", target, low, high)
            }
        })
    }

    fn bind(&mut self, operand: &Operand, numeric: bool) -> String {
        let value = match (numeric, operand.number) {
            (true, Some(n)) => SqlValue::Real(n),
            _ => SqlValue::Text(operand.text.clone()),
        };
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        if numeric {
            format!("CAST({} AS DOUBLE PRECISION)", placeholder)
        } else {
            placeholder
        }
    }
}

fn qualified(table: &str, column: &str, alias: bool) -> String {
    if alias {
        format!("{}.{} AS {}", quote_ident(table), quote_ident(column), quote_ident(column))
    } else {
        format!("{}.{}", quote_ident(table), quote_ident(column))
    }
}

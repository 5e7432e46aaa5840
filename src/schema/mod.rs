//! In-memory schema graph.
//!
//! Tables, columns, keys and the relationships usable as join edges are
//! declared once at start-up. The resolver and query builder work purely on
//! this value; nothing is reflected from the database at query time.

pub mod gtdb;

use serde::Serialize;

use crate::db::Database;

pub use gtdb::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, ColumnType::Text)
    }

    /// SQL type name, understood by both SQLite and PostgreSQL.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "BIGINT",
            ColumnType::Real => "DOUBLE PRECISION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

impl ColumnDef {
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn real(name: &str) -> Self {
        Self::new(name, ColumnType::Real)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub references: String,
    pub referenced_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>, primary_key: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_foreign_key(mut self, columns: &[&str], references: &str, referenced: &[&str]) -> Self {
        self.foreign_keys.push(ForeignKey {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            references: references.to_string(),
            referenced_columns: referenced.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// A join edge between two tables: pairs of (left column, right column).
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub left: String,
    pub right: String,
    pub on: Vec<(String, String)>,
}

impl Relationship {
    pub fn new(left: &str, right: &str, on: &[(&str, &str)]) -> Self {
        Self {
            left: left.to_string(),
            right: right.to_string(),
            on: on
                .iter()
                .map(|(l, r)| (l.to_string(), r.to_string()))
                .collect(),
        }
    }

    /// Join columns oriented as (column of `from`, column of `to`), if this
    /// relationship connects the two tables in either direction.
    pub fn oriented(&self, from: &str, to: &str) -> Option<Vec<(String, String)>> {
        if self.left == from && self.right == to {
            Some(self.on.clone())
        } else if self.left == to && self.right == from {
            Some(self.on.iter().map(|(l, r)| (r.clone(), l.clone())).collect())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Live { release: i64 },
    History,
    Custom,
}

#[derive(Debug, Clone)]
pub struct Schema {
    kind: SchemaKind,
    tables: Vec<TableDef>,
    relationships: Vec<Relationship>,
}

impl Schema {
    pub fn new(tables: Vec<TableDef>, relationships: Vec<Relationship>) -> Self {
        Self {
            kind: SchemaKind::Custom,
            tables,
            relationships,
        }
    }

    /// Tables in declaration order (parents before children).
    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Position of a table in declaration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.tables.iter().position(|t| t.name == name)
    }

    /// The table backing an entity in this schema.
    pub fn table_for(&self, entity: Entity) -> Option<&TableDef> {
        let name = match self.kind {
            SchemaKind::Live { release } => entity.live_table_name(release),
            SchemaKind::History => entity.history_table_name(),
            SchemaKind::Custom => entity.base_name().to_string(),
        };
        self.table(&name)
    }

    pub fn relationship_between(&self, from: &str, to: &str) -> Option<Vec<(String, String)>> {
        self.relationships.iter().find_map(|r| r.oriented(from, to))
    }

    /// Compare the declared tables against what the database actually holds.
    /// Returns one message per problem; an empty list means the database
    /// matches the declaration.
    pub fn verify(&self, db: &Database) -> Vec<String> {
        let mut problems = Vec::new();
        for table in &self.tables {
            match db.table_columns(&table.name) {
                Ok(columns) if columns.is_empty() => {
                    problems.push(format!("table '{}' does not exist", table.name));
                }
                Ok(columns) => {
                    for name in table.column_names() {
                        if !columns.iter().any(|c| c == name) {
                            problems.push(format!("table '{}' is missing column '{}'", table.name, name));
                        }
                    }
                }
                Err(e) => problems.push(format!("could not inspect '{}': {}", table.name, e)),
            }
        }
        for problem in &problems {
            tracing::warn!("Schema check: {}", problem);
        }
        problems
    }
}

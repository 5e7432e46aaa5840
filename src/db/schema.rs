//! DDL and DML text generated from the schema graph. The type names used are
//! understood by both SQLite and PostgreSQL.

use super::{quote_ident, Dialect};
use crate::schema::TableDef;

/// `CREATE TABLE IF NOT EXISTS` plus an index on every foreign-key column.
pub fn create_table_sql(table: &TableDef, foreign_keys: bool) -> String {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("    {} {}", quote_ident(&c.name), c.ty.sql_type()))
        .collect();

    if !table.primary_key.is_empty() {
        lines.push(format!("    PRIMARY KEY ({})", quote_list(&table.primary_key)));
    }

    if foreign_keys {
        for fk in &table.foreign_keys {
            lines.push(format!(
                "    FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_list(&fk.columns),
                quote_ident(&fk.references),
                quote_list(&fk.referenced_columns)
            ));
        }
    }

    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n);\n",
        quote_ident(&table.name),
        lines.join(",\n")
    );

    // Join columns are looked up constantly; index them even when the
    // constraints themselves are off.
    for fk in &table.foreign_keys {
        for column in &fk.columns {
            if table.primary_key.first() == Some(column) {
                continue;
            }
            sql.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({});\n",
                quote_ident(&format!("idx_{}_{}", table.name, column)),
                quote_ident(&table.name),
                quote_ident(column)
            ));
        }
    }

    sql
}

pub fn drop_table_sql(name: &str) -> String {
    format!("DROP TABLE IF EXISTS {};\n", quote_ident(name))
}

/// Single-row insert over every declared column, in declaration order.
pub fn insert_sql(table: &TableDef, dialect: Dialect) -> String {
    let columns: Vec<String> = table.column_names().map(quote_ident).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|n| dialect.placeholder(n)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&table.name),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn quote_list(names: &[String]) -> String {
    names.iter().map(|n| quote_ident(n)).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Entity, Schema};

    #[test]
    fn test_create_table_sql() {
        let schema = Schema::live(207);
        let table = schema.table_for(Entity::AnnotationsKegg).unwrap();

        let with_fk = create_table_sql(table, true);
        assert!(with_fk.starts_with("CREATE TABLE IF NOT EXISTS \"annotations_kegg_r207\""));
        assert!(with_fk.contains("\"e_value\" DOUBLE PRECISION"));
        assert!(with_fk.contains("PRIMARY KEY (\"annotation_id\")"));
        assert!(with_fk.contains("FOREIGN KEY (\"gene_id\") REFERENCES \"proteins_r207\" (\"gene_id\")"));
        assert!(with_fk.contains("\"idx_annotations_kegg_r207_gene_id\""));

        let without_fk = create_table_sql(table, false);
        assert!(!without_fk.contains("FOREIGN KEY"));
        assert!(without_fk.contains("CREATE INDEX"));
    }

    #[test]
    fn test_insert_sql() {
        let schema = Schema::history();
        let table = schema.table_for(Entity::AnnotationsKegg).unwrap();
        let sql = insert_sql(table, Dialect::Postgres);
        assert!(sql.starts_with("INSERT INTO \"annotations_kegg_history\" (\"annotation_id\", \"release\""));
        assert!(sql.ends_with("VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"));
    }
}

//! Query surface: turning a resource name plus a filter expression into rows.
//!
//! The flow is always parse → resolve → build → run. Each request builds its
//! own statement; nothing is cached between requests.

pub mod builder;
pub mod filter;
pub mod resolver;

use std::fmt;
use std::str::FromStr;

use crate::db::{Database, ResultSet};
use crate::error::QueryError;
use crate::schema::{Entity, Schema};

pub use builder::{Page, QueryBuilder, Shape, Statement};
pub use filter::{Comparison, Filter, Operand, Predicate};
pub use resolver::{resolve, Resolution};

/// Query-string key that selects a page rather than naming a field.
pub const PAGE_KEY: &str = "page";

/// A queryable entity as named in request paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Metadata,
    Proteins,
    Annotations,
    AnnotationsPfam,
}

impl Resource {
    pub fn entity(&self) -> Entity {
        match self {
            Resource::Metadata => Entity::Metadata,
            Resource::Proteins => Entity::Proteins,
            Resource::Annotations => Entity::AnnotationsKegg,
            Resource::AnnotationsPfam => Entity::AnnotationsPfam,
        }
    }
}

impl FromStr for Resource {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metadata" => Ok(Resource::Metadata),
            "proteins" | "sequences" => Ok(Resource::Proteins),
            "annotations" | "annotations_kegg" => Ok(Resource::Annotations),
            "annotations_pfam" => Ok(Resource::AnnotationsPfam),
            other => Err(QueryError::UnknownResource {
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entity().base_name())
    }
}

/// A fully parsed request: which resource, how to filter it, which page.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub resource: Resource,
    pub filter: Filter,
    /// Zero-indexed page; `None` returns every matching row.
    pub page: Option<usize>,
}

impl QueryRequest {
    pub fn new(resource: Resource, filter: Filter) -> Self {
        Self {
            resource,
            filter,
            page: None,
        }
    }

    pub fn with_page(mut self, page: Option<usize>) -> Self {
        self.page = page;
        self
    }

    /// Path form: `/{resource}/{expression}`.
    pub fn from_expression(resource: &str, expression: &str) -> Result<Self, QueryError> {
        Ok(Self::new(resource.parse()?, Filter::parse(expression)?))
    }

    /// Query-string form. `field=*` includes a field, `field=[op]value`
    /// applies an operator and `field=value` tests equality. `page` is not a
    /// field.
    pub fn from_query_pairs(resource: &str, pairs: &[(String, String)]) -> Result<Self, QueryError> {
        Self::from_parts(resource, "", pairs)
    }

    /// Both forms at once: the path expression and every query-string
    /// token apply together.
    pub fn from_parts(resource: &str, expression: &str, pairs: &[(String, String)]) -> Result<Self, QueryError> {
        let resource = resource.parse()?;
        let mut page = None;
        let mut tokens = Vec::new();
        if !expression.is_empty() {
            tokens.push(expression.to_string());
        }
        for (key, value) in pairs {
            if key == PAGE_KEY {
                page = Some(parse_page(value)?);
            } else if value == "*" {
                tokens.push(key.clone());
            } else if value.starts_with('[') {
                tokens.push(format!("{}{}", key, value));
            } else {
                tokens.push(format!("{}[eq]{}", key, value));
            }
        }
        let filter = Filter::parse(&tokens.join("[and]"))?;
        Ok(Self::new(resource, filter).with_page(page))
    }
}

pub fn parse_page(value: &str) -> Result<usize, QueryError> {
    value.parse().map_err(|_| QueryError::InvalidPage {
        value: value.to_string(),
    })
}

/// Build the statement for a request without running it.
pub fn statement(
    db: &Database,
    schema: &Schema,
    request: &QueryRequest,
    shape: Shape,
) -> Result<Statement, QueryError> {
    let primary = schema
        .table_for(request.resource.entity())
        .ok_or_else(|| QueryError::UnknownResource {
            name: request.resource.to_string(),
        })?;
    let resolution = resolve(schema, primary, request.filter.fields())?;
    QueryBuilder::new(schema, primary, db.dialect()).build(&request.filter, &resolution, shape)
}

/// Run a request and return its rows, one page of them when a page is set.
pub fn execute(db: &Database, schema: &Schema, request: &QueryRequest, page_size: usize) -> Result<ResultSet, QueryError> {
    let page = request
        .page
        .map(|number| Page::new(number, page_size))
        .transpose()?;
    let stmt = statement(db, schema, request, Shape::Rows(page))?;
    let mut result = db.query(&stmt.sql, &stmt.params)?;
    result.columns = stmt.columns;
    tracing::debug!(resource = %request.resource, rows = result.len(), "Query complete");
    Ok(result)
}

/// Number of rows the request would return unpaged.
pub fn count(db: &Database, schema: &Schema, request: &QueryRequest) -> Result<i64, QueryError> {
    let stmt = statement(db, schema, request, Shape::Count)?;
    Ok(db.query(&stmt.sql, &stmt.params)?.scalar().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Row, SqlValue};

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_resource_aliases() {
        assert_eq!("sequences".parse::<Resource>().unwrap(), Resource::Proteins);
        assert_eq!("annotations".parse::<Resource>().unwrap(), Resource::Annotations);
        let err = "genes".parse::<Resource>().unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn test_query_pairs_translate_to_grammar() {
        let request = QueryRequest::from_query_pairs(
            "annotations",
            &pairs(&[
                ("ko", "K02956"),
                ("e_value", "[lt]0.001"),
                ("gene_id", "*"),
                ("page", "3"),
            ]),
        )
        .unwrap();
        assert_eq!(request.page, Some(3));
        assert_eq!(
            request.filter,
            Filter::parse("ko[eq]K02956[and]e_value[lt]0.001[and]gene_id").unwrap()
        );

        let err = QueryRequest::from_query_pairs("metadata", &pairs(&[("page", "two")])).unwrap_err();
        assert!(matches!(err, QueryError::InvalidPage { .. }));

        let err = QueryRequest::from_query_pairs("metadata", &pairs(&[("ko", "")])).unwrap_err();
        assert!(matches!(err, QueryError::FilterSyntax(_)));
    }

    #[test]
    fn test_path_expression_and_query_pairs_combine() {
        let request = QueryRequest::from_parts(
            "metadata",
            "gtdb_genus[eq]Escherichia",
            &pairs(&[("contig_count", "[lt]5"), ("page", "0")]),
        )
        .unwrap();
        assert_eq!(request.page, Some(0));
        assert_eq!(
            request.filter,
            Filter::parse("gtdb_genus[eq]Escherichia[and]contig_count[lt]5").unwrap()
        );
    }

    #[test]
    fn test_execute_and_count() {
        let db = Database::open_in_memory(true).unwrap();
        let schema = Schema::live(207);
        db.create_tables(&schema, false).unwrap();

        let meta = schema.table_for(Entity::Metadata).unwrap();
        let proteins = schema.table_for(Entity::Proteins).unwrap();
        for g in 0..3 {
            let genome = format!("GCA_{:09}.1", g);
            let mut row = Row::new();
            row.insert("genome_id".into(), genome.clone().into());
            row.insert("release".into(), 207i64.into());
            row.insert("gtdb_phylum".into(), if g == 0 { "Firmicutes" } else { "Proteobacteria" }.into());
            db.insert_row(meta, &row).unwrap();
            for n in 0..4 {
                let mut row = Row::new();
                row.insert("gene_id".into(), format!("{}_{}", genome, n).into());
                row.insert("genome_id".into(), genome.clone().into());
                row.insert("release".into(), 207i64.into());
                db.insert_row(proteins, &row).unwrap();
            }
        }

        let request = QueryRequest::from_expression("sequences", "gtdb_phylum[eq]Proteobacteria").unwrap();
        assert_eq!(count(&db, &schema, &request).unwrap(), 8);

        let result = execute(&db, &schema, &request.clone().with_page(Some(1)), 5).unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result.columns.last().map(String::as_str), Some("gtdb_phylum"));
        assert_eq!(result.rows[0][0], SqlValue::Text("GCA_000000002.1_1".into()));

        let all = execute(&db, &schema, &request, 5).unwrap();
        assert_eq!(all.len(), 8);

        let err = execute(&db, &schema, &QueryRequest::from_expression("metadata", "nope").unwrap(), 5)
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_page_past_integer_range_is_client_error() {
        let db = Database::open_in_memory(true).unwrap();
        let schema = Schema::live(207);
        db.create_tables(&schema, false).unwrap();

        let request =
            QueryRequest::from_query_pairs("metadata", &pairs(&[("page", "99999999999999999")])).unwrap();
        let err = execute(&db, &schema, &request, 500).unwrap_err();
        assert!(matches!(err, QueryError::InvalidPage { .. }));
        assert_eq!(err.status(), 400);

        // The last representable page still runs.
        let request = request.with_page(Some(i64::MAX as usize / 500));
        assert!(execute(&db, &schema, &request, 500).unwrap().is_empty());
    }
}

//! Error types for Find-A-Bug.
//!
//! Query-side errors are raised close to the parser, resolver and builder and
//! travel unchanged to the HTTP boundary, where [`QueryError::status`] decides
//! the response code. Ingestion errors are contained by the pipeline at file,
//! chunk or row granularity and never abort a run.

use std::path::PathBuf;
use thiserror::Error;

/// A malformed filter expression.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid filter '{fragment}': {reason}")]
pub struct FilterSyntaxError {
    /// The token of the expression that could not be parsed.
    pub fragment: String,
    pub reason: String,
}

impl FilterSyntaxError {
    pub fn new(fragment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while turning a request into SQL and running it.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    FilterSyntax(#[from] FilterSyntaxError),

    #[error("Fields not found in any table: {}", fields.join(", "))]
    UnresolvedField { fields: Vec<String> },

    #[error("No relationship declared between '{primary}' and '{table}'")]
    JoinConfiguration { primary: String, table: String },

    #[error("Operator '{operator}' cannot be applied to {column_type} column '{field}'")]
    TypeMismatch {
        field: String,
        column_type: &'static str,
        operator: &'static str,
    },

    #[error("Unknown resource '{name}'")]
    UnknownResource { name: String },

    #[error("Invalid page '{value}'")]
    InvalidPage { value: String },

    #[error(transparent)]
    Database(#[from] DbError),
}

impl QueryError {
    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            QueryError::FilterSyntax(_)
            | QueryError::UnresolvedField { .. }
            | QueryError::TypeMismatch { .. }
            | QueryError::InvalidPage { .. } => 400,
            QueryError::UnknownResource { .. } => 404,
            QueryError::JoinConfiguration { .. } | QueryError::Database(_) => 500,
        }
    }

    /// Whether the error describes a client mistake that can be echoed back.
    pub fn is_client_error(&self) -> bool {
        self.status() < 500
    }
}

/// Errors from the database backends.
#[derive(Debug, Error)]
pub enum DbError {
    /// A uniqueness, foreign-key or not-null constraint rejected a write.
    #[error("Integrity violation: {message}")]
    Integrity { message: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[source] postgres::Error),

    #[cfg(feature = "postgres")]
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Database lock poisoned")]
    Poisoned,
}

impl DbError {
    pub fn is_integrity(&self) -> bool {
        matches!(self, DbError::Integrity { .. })
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DbError::Integrity {
                    message: message.clone().unwrap_or_else(|| code.to_string()),
                }
            }
            _ => DbError::Sqlite(err),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<postgres::Error> for DbError {
    fn from(err: postgres::Error) -> Self {
        // SQLSTATE class 23 covers every integrity constraint violation.
        let integrity = err
            .code()
            .map(|state| state.code().starts_with("23"))
            .unwrap_or(false);
        if integrity {
            DbError::Integrity {
                message: err.to_string(),
            }
        } else {
            DbError::Postgres(err)
        }
    }
}

/// Errors raised while reading source files for ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Paired sequence files for genome '{genome_id}' disagree: {message}")]
    PairedFileMismatch { genome_id: String, message: String },

    #[error("No {missing} file found for genome '{genome_id}'")]
    MissingPair {
        genome_id: String,
        missing: &'static str,
    },

    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed delimited file '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl IngestError {
    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        IngestError::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_status() {
        let syntax = QueryError::from(FilterSyntaxError::new("ko[xx]1", "unknown operator"));
        assert_eq!(syntax.status(), 400);

        let unresolved = QueryError::UnresolvedField {
            fields: vec!["foo".to_string(), "bar".to_string()],
        };
        assert_eq!(unresolved.status(), 400);
        assert_eq!(unresolved.to_string(), "Fields not found in any table: foo, bar");

        let join = QueryError::JoinConfiguration {
            primary: "annotations_kegg_r207".to_string(),
            table: "annotations_pfam_r207".to_string(),
        };
        assert_eq!(join.status(), 500);
        assert!(!join.is_client_error());

        let unknown = QueryError::UnknownResource {
            name: "genes".to_string(),
        };
        assert_eq!(unknown.status(), 404);
    }

    #[test]
    fn test_sqlite_constraint_is_integrity() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES (1)", []).unwrap_err();
        assert!(DbError::from(err).is_integrity());

        let err = conn.execute("INSERT INTO missing VALUES (1)", []).unwrap_err();
        assert!(!DbError::from(err).is_integrity());
    }
}

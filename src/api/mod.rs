//! HTTP surface. Every data route answers with CSV; errors the caller caused
//! are echoed back, everything else becomes an opaque 500.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::db::Database;
use crate::error::QueryError;
use crate::export;
use crate::query::{self, QueryRequest};
use crate::schema::Schema;

const WELCOME: &str = "Find-A-Bug: query GTDB genome metadata, proteins and KEGG/Pfam annotations.\n\
Try /metadata/gtdb_genus[eq]Escherichia or /count/annotations/ko[eq]K02956\n";

#[derive(Clone)]
pub struct AppState {
    db: Arc<Database>,
    live: Arc<Schema>,
    history: Arc<Schema>,
    page_size: usize,
}

impl AppState {
    pub fn new(db: Arc<Database>, release: i64, page_size: usize) -> Self {
        Self {
            db,
            live: Arc::new(Schema::live(release)),
            history: Arc::new(Schema::history()),
            page_size,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn live(&self) -> &Schema {
        &self.live
    }

    pub fn history(&self) -> &Schema {
        &self.history
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/info", get(info))
        .route("/count/:resource", get(count))
        .route("/count/:resource/:expression", get(count_filtered))
        .route("/history/:resource", get(history))
        .route("/history/:resource/:expression", get(history_filtered))
        .route("/:resource", get(rows))
        .route("/:resource/:expression", get(rows_filtered))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Query(QueryError),
    Internal(anyhow::Error),
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError::Query(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Query(err) if err.is_client_error() => {
                let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::BAD_REQUEST);
                (status, format!("{}\n", err)).into_response()
            }
            ApiError::Query(err) => internal(&err),
            ApiError::Internal(err) => internal(&err),
        }
    }
}

fn internal(err: &dyn std::fmt::Display) -> Response {
    tracing::error!("Request failed: {}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error\n").into_response()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Live,
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Rows,
    Count,
}

async fn welcome() -> &'static str {
    WELCOME
}

async fn info(State(state): State<AppState>) -> Json<Value> {
    let tables: Vec<Value> = state
        .live
        .tables()
        .iter()
        .map(|t| {
            json!({
                "table": t.name,
                "primary_key": t.primary_key,
                "columns": t.column_names().collect::<Vec<_>>(),
            })
        })
        .collect();
    Json(Value::Array(tables))
}

async fn rows(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    answer(state, Target::Live, Output::Rows, resource, None, params).await
}

async fn rows_filtered(
    State(state): State<AppState>,
    Path((resource, expression)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    answer(state, Target::Live, Output::Rows, resource, Some(expression), params).await
}

async fn count(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    answer(state, Target::Live, Output::Count, resource, None, params).await
}

async fn count_filtered(
    State(state): State<AppState>,
    Path((resource, expression)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    answer(state, Target::Live, Output::Count, resource, Some(expression), params).await
}

async fn history(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    answer(state, Target::History, Output::Rows, resource, None, params).await
}

async fn history_filtered(
    State(state): State<AppState>,
    Path((resource, expression)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    answer(state, Target::History, Output::Rows, resource, Some(expression), params).await
}

/// The path expression and any query-string filters apply together.
fn parse_request(
    resource: &str,
    expression: Option<&str>,
    params: &[(String, String)],
) -> Result<QueryRequest, QueryError> {
    QueryRequest::from_parts(resource, expression.unwrap_or(""), params)
}

async fn answer(
    state: AppState,
    target: Target,
    output: Output,
    resource: String,
    expression: Option<String>,
    params: Vec<(String, String)>,
) -> Result<Response, ApiError> {
    let request = parse_request(&resource, expression.as_deref(), &params)?;
    tracing::debug!(%resource, filter = %request.filter.to_expression(), page = ?request.page, "Handling query");

    // Database calls block; keep them off the async workers.
    let body = tokio::task::spawn_blocking(move || -> Result<String, ApiError> {
        let schema = match target {
            Target::Live => &state.live,
            Target::History => &state.history,
        };
        match output {
            Output::Count => Ok(format!("{}\n", query::count(&state.db, schema, &request)?)),
            Output::Rows => {
                let result = query::execute(&state.db, schema, &request, state.page_size)?;
                Ok(export::to_csv(&result)?)
            }
        }
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("Query task failed: {}", e)))??;

    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Row;
    use crate::schema::Entity;

    fn state() -> AppState {
        let db = Database::open_in_memory(true).unwrap();
        let schema = Schema::live(207);
        db.create_tables(&schema, false).unwrap();
        db.create_tables(&Schema::history(), false).unwrap();

        let metadata = schema.table_for(Entity::Metadata).unwrap();
        for (genome, genus, contigs) in [
            ("GCA_000000001.1", "Escherichia", 3i64),
            ("GCA_000000002.1", "Bacillus", 12),
            ("GCA_000000003.1", "Escherichia", 40),
        ] {
            let mut row = Row::new();
            row.insert("genome_id".into(), genome.into());
            row.insert("release".into(), 207i64.into());
            row.insert("gtdb_genus".into(), genus.into());
            row.insert("contig_count".into(), contigs.into());
            db.insert_row(metadata, &row).unwrap();
        }
        AppState::new(Arc::new(db), 207, 2)
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn params(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn test_rows_filtered_returns_csv() {
        let response = answer(
            state(),
            Target::Live,
            Output::Rows,
            "metadata".into(),
            Some("gtdb_genus[eq]Escherichia[and]contig_count[lt]10".into()),
            vec![],
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let text = body_text(response).await;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("genome_id,release,"));
        assert!(lines[1].starts_with("GCA_000000001.1,207,"));
    }

    #[tokio::test]
    async fn test_query_string_form_and_paging() {
        let response = answer(
            state(),
            Target::Live,
            Output::Rows,
            "metadata".into(),
            None,
            params(&[("gtdb_genus", "*"), ("page", "1")]),
        )
        .await
        .unwrap();
        let text = body_text(response).await;
        let lines: Vec<&str> = text.lines().collect();
        // Page size 2: the second page holds the last genome only.
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("GCA_000000003.1"));
    }

    #[tokio::test]
    async fn test_query_string_filters_apply_with_path_expression() {
        let response = answer(
            state(),
            Target::Live,
            Output::Count,
            "metadata".into(),
            Some("gtdb_genus[eq]Escherichia".into()),
            params(&[("contig_count", "[lt]5")]),
        )
        .await
        .unwrap();
        assert_eq!(body_text(response).await, "1\n");
    }

    #[tokio::test]
    async fn test_count_and_empty_result() {
        let response = answer(
            state(),
            Target::Live,
            Output::Count,
            "metadata".into(),
            Some("gtdb_genus[eq]Escherichia".into()),
            vec![],
        )
        .await
        .unwrap();
        assert_eq!(body_text(response).await, "2\n");

        let response = answer(
            state(),
            Target::History,
            Output::Rows,
            "metadata".into(),
            None,
            vec![],
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "");
    }

    #[tokio::test]
    async fn test_client_errors_are_echoed() {
        let err = answer(
            state(),
            Target::Live,
            Output::Rows,
            "metadata".into(),
            Some("gtdb_genus[like]Esch".into()),
            vec![],
        )
        .await
        .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("gtdb_genus[like]Esch"));

        let err = answer(state(), Target::Live, Output::Rows, "genes".into(), None, vec![])
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oversized_page_is_bad_request() {
        let err = answer(
            state(),
            Target::Live,
            Output::Rows,
            "metadata".into(),
            None,
            params(&[("page", "99999999999999999")]),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_server_errors_are_opaque() {
        let db = Database::open_in_memory(false).unwrap();
        let state = AppState::new(Arc::new(db), 207, 10);
        let err = answer(state, Target::Live, Output::Rows, "metadata".into(), None, vec![])
            .await
            .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Internal server error\n");
    }

    #[tokio::test]
    async fn test_info_lists_live_tables() {
        let Json(value) = info(State(state())).await;
        let tables = value.as_array().unwrap();
        assert_eq!(tables.len(), 4);
        assert_eq!(tables[0]["table"], "metadata_r207");
        assert_eq!(tables[0]["primary_key"][0], "genome_id");
    }
}

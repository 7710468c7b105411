//! In-memory stand-in for a PostgREST endpoint serving the review and return
//! schema.
//!
//! Supports the subset of PostgREST the commerce store relies on: `eq.`
//! filters, `select`, `order`, `limit`/`offset`, `Prefer:
//! return=representation`, and the two read-only views that embed child
//! rows. Foreign keys and the rating check are enforced so error paths can be
//! exercised end to end.

use std::{cmp::Ordering, collections::HashMap, collections::HashSet, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;
use uuid::Uuid;

pub const TABLES: &[&str] = &[
    "product_reviews",
    "review_images",
    "returns",
    "return_items",
    "return_images",
];
pub const VIEWS: &[&str] = &["reviews_with_images", "returns_with_details"];

/// Image columns exposed by the views.
const IMAGE_COLUMNS: &[&str] = &["id", "image_url"];

/// Behaviour switches for a mock instance.
#[derive(Clone, Debug, Default)]
pub struct MockConfig {
    /// When set, every request must carry `Authorization: Bearer <key>`.
    pub api_key: Option<String>,
    /// Resources that answer every request with 503.
    pub failing: HashSet<String>,
}

impl MockConfig {
    pub fn failing(resources: &[&str]) -> Self {
        Self {
            api_key: None,
            failing: resources.iter().map(|r| r.to_string()).collect(),
        }
    }
}

#[derive(Clone, Debug)]
struct Row {
    seq: u64,
    data: Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct Database {
    tables: HashMap<&'static str, Vec<Row>>,
    next_seq: u64,
}

#[derive(Clone)]
pub struct AppState {
    db: Arc<RwLock<Database>>,
    config: Arc<MockConfig>,
}

/// A PostgREST-shaped error body.
#[derive(Debug)]
pub struct PgError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl PgError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for PgError {
    fn into_response(self) -> Response {
        let body = json!({
            "code": self.code,
            "message": self.message,
            "details": null,
            "hint": null,
        });
        (self.status, Json(body)).into_response()
    }
}

pub fn app() -> Router {
    app_with(MockConfig::default())
}

pub fn app_with(config: MockConfig) -> Router {
    let state = AppState {
        db: Arc::new(RwLock::new(Database::default())),
        config: Arc::new(config),
    };
    Router::new()
        .route(
            "/{resource}",
            get(read_rows).post(insert_rows).patch(update_rows),
        )
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, MockConfig::default()).await
}

pub async fn run_with(listener: TcpListener, config: MockConfig) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(config)).await
}

async fn read_rows(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, PgError> {
    debug!(%resource, ?params, "GET");
    guard(&state, &resource, &headers)?;
    let query = RowQuery::parse(&params)?;
    let db = state.db.read().await;
    let rows = db.source(&resource);
    Ok(Json(query.apply(rows)).into_response())
}

async fn insert_rows(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, PgError> {
    debug!(%resource, "POST");
    guard(&state, &resource, &headers)?;
    let table = writable(&resource)?;
    let rows = match body {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        _ => {
            return Err(PgError::new(
                StatusCode::BAD_REQUEST,
                "PGRST102",
                "body must be a JSON object or array",
            ))
        }
    };
    let created = state.db.write().await.insert(table, rows)?;
    if wants_representation(&headers) {
        Ok((StatusCode::CREATED, Json(Value::Array(created))).into_response())
    } else {
        Ok(StatusCode::CREATED.into_response())
    }
}

async fn update_rows(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
    Json(body): Json<Value>,
) -> Result<Response, PgError> {
    debug!(%resource, ?params, "PATCH");
    guard(&state, &resource, &headers)?;
    let table = writable(&resource)?;
    let Value::Object(patch) = body else {
        return Err(PgError::new(
            StatusCode::BAD_REQUEST,
            "PGRST102",
            "body must be a JSON object",
        ));
    };
    let query = RowQuery::parse(&params)?;
    let updated = state.db.write().await.update(table, &query, &patch);
    if wants_representation(&headers) {
        Ok((StatusCode::OK, Json(Value::Array(updated))).into_response())
    } else {
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

fn guard(state: &AppState, resource: &str, headers: &HeaderMap) -> Result<(), PgError> {
    if let Some(key) = &state.config.api_key {
        let expected = format!("Bearer {key}");
        let given = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if given != Some(expected.as_str()) {
            return Err(PgError::new(
                StatusCode::UNAUTHORIZED,
                "PGRST301",
                "JWT invalid or missing",
            ));
        }
    }
    if !TABLES.iter().chain(VIEWS).any(|r| *r == resource) {
        return Err(PgError::new(
            StatusCode::NOT_FOUND,
            "PGRST205",
            format!("Could not find the table 'public.{resource}' in the schema cache"),
        ));
    }
    if state.config.failing.contains(resource) {
        return Err(PgError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "PGRST000",
            format!("{resource} is unavailable"),
        ));
    }
    Ok(())
}

fn writable(resource: &str) -> Result<&'static str, PgError> {
    TABLES
        .iter()
        .copied()
        .find(|t| *t == resource)
        .ok_or_else(|| {
            PgError::new(
                StatusCode::METHOD_NOT_ALLOWED,
                "PGRST117",
                format!("{resource} is read-only"),
            )
        })
}

fn wants_representation(headers: &HeaderMap) -> bool {
    headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|p| p.contains("return=representation"))
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// (column, parent table) for every foreign key in the schema.
fn foreign_key(table: &str) -> Option<(&'static str, &'static str)> {
    match table {
        "review_images" => Some(("review_id", "product_reviews")),
        "return_items" | "return_images" => Some(("return_id", "returns")),
        _ => None,
    }
}

fn required_columns(table: &str) -> &'static [&'static str] {
    match table {
        "product_reviews" => &["product_id", "product_handle", "rating"],
        "review_images" => &["review_id", "image_url"],
        "returns" => &["order_id", "order_name", "status"],
        "return_items" => &["return_id", "line_item_id", "quantity"],
        "return_images" => &["return_id", "image_url"],
        _ => &[],
    }
}

impl Database {
    fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn has_id(&self, table: &str, id: &Value) -> bool {
        self.rows(table).iter().any(|r| r.data.get("id") == Some(id))
    }

    /// Validate the whole batch first so a rejected batch writes nothing.
    fn insert(&mut self, table: &'static str, rows: Vec<Value>) -> Result<Vec<Value>, PgError> {
        let mut objects = Vec::with_capacity(rows.len());
        for row in rows {
            let Value::Object(object) = row else {
                return Err(PgError::new(
                    StatusCode::BAD_REQUEST,
                    "PGRST102",
                    "every row must be a JSON object",
                ));
            };
            self.check(table, &object)?;
            objects.push(object);
        }

        let mut created = Vec::with_capacity(objects.len());
        for mut object in objects {
            object
                .entry("id")
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
            object
                .entry("created_at")
                .or_insert_with(|| Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)));
            self.next_seq += 1;
            created.push(Value::Object(object.clone()));
            self.tables.entry(table).or_default().push(Row {
                seq: self.next_seq,
                data: object,
            });
        }
        Ok(created)
    }

    fn check(&self, table: &str, object: &Map<String, Value>) -> Result<(), PgError> {
        for column in required_columns(table) {
            if object.get(*column).map_or(true, Value::is_null) {
                return Err(PgError::new(
                    StatusCode::BAD_REQUEST,
                    "23502",
                    format!("null value in column \"{column}\" of relation \"{table}\""),
                ));
            }
        }
        if table == "product_reviews" {
            let rating = object.get("rating").and_then(Value::as_i64);
            if !rating.is_some_and(|r| (1..=5).contains(&r)) {
                return Err(PgError::new(
                    StatusCode::BAD_REQUEST,
                    "23514",
                    "new row for relation \"product_reviews\" violates check constraint \"product_reviews_rating_check\"",
                ));
            }
        }
        if let Some((column, parent)) = foreign_key(table) {
            let parent_id = object.get(column).unwrap_or(&Value::Null);
            if !self.has_id(parent, parent_id) {
                return Err(PgError::new(
                    StatusCode::CONFLICT,
                    "23503",
                    format!("insert or update on table \"{table}\" violates foreign key constraint on \"{column}\""),
                ));
            }
        }
        Ok(())
    }

    fn update(&mut self, table: &str, query: &RowQuery, patch: &Map<String, Value>) -> Vec<Value> {
        let Some(rows) = self.tables.get_mut(table) else {
            return Vec::new();
        };
        let mut updated = Vec::new();
        for row in rows.iter_mut().filter(|r| query.matches(&r.data)) {
            for (column, value) in patch {
                if column != "id" {
                    row.data.insert(column.clone(), value.clone());
                }
            }
            updated.push(Value::Object(row.data.clone()));
        }
        updated
    }

    /// Rows of a table, or of a view built from the tables.
    fn source(&self, resource: &str) -> Vec<Row> {
        match resource {
            "reviews_with_images" => self.embed(
                "product_reviews",
                &[("images", "review_images", "review_id", Some(IMAGE_COLUMNS))],
            ),
            "returns_with_details" => self.embed(
                "returns",
                &[
                    ("items", "return_items", "return_id", None),
                    ("images", "return_images", "return_id", Some(IMAGE_COLUMNS)),
                ],
            ),
            table => self.rows(table).to_vec(),
        }
    }

    /// Attach child rows (optionally projected) to each parent row.
    #[allow(clippy::type_complexity)]
    fn embed(
        &self,
        parent: &str,
        children: &[(&str, &str, &str, Option<&[&str]>)],
    ) -> Vec<Row> {
        self.rows(parent)
            .iter()
            .map(|row| {
                let mut data = row.data.clone();
                let id = row.data.get("id").cloned().unwrap_or(Value::Null);
                for (field, table, column, columns) in children {
                    let embedded: Vec<Value> = self
                        .rows(table)
                        .iter()
                        .filter(|child| child.data.get(*column) == Some(&id))
                        .map(|child| Value::Object(project(&child.data, *columns)))
                        .collect();
                    data.insert(field.to_string(), Value::Array(embedded));
                }
                Row { seq: row.seq, data }
            })
            .collect()
    }
}

fn project(data: &Map<String, Value>, columns: Option<&[&str]>) -> Map<String, Value> {
    match columns {
        None => data.clone(),
        Some(columns) => data
            .iter()
            .filter(|(k, _)| columns.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Query string
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RowQuery {
    filters: Vec<(String, String)>,
    select: Option<Vec<String>>,
    order: Option<(String, bool)>,
    limit: Option<usize>,
    offset: usize,
}

impl RowQuery {
    fn parse(params: &[(String, String)]) -> Result<Self, PgError> {
        let mut query = RowQuery::default();
        for (key, value) in params {
            match key.as_str() {
                "select" => {
                    query.select = Some(value.split(',').map(|c| c.trim().to_string()).collect())
                }
                "order" => {
                    let (column, direction) = value.split_once('.').unwrap_or((value, "asc"));
                    let descending = match direction {
                        "asc" => false,
                        "desc" => true,
                        other => {
                            return Err(PgError::new(
                                StatusCode::BAD_REQUEST,
                                "PGRST100",
                                format!("unknown order direction \"{other}\""),
                            ))
                        }
                    };
                    query.order = Some((column.to_string(), descending));
                }
                "limit" => query.limit = Some(parse_count(key, value)?),
                "offset" => query.offset = parse_count(key, value)?,
                column => {
                    let Some(expected) = value.strip_prefix("eq.") else {
                        return Err(PgError::new(
                            StatusCode::BAD_REQUEST,
                            "PGRST100",
                            format!("unsupported filter \"{value}\" on \"{column}\""),
                        ));
                    };
                    query.filters.push((column.to_string(), expected.to_string()));
                }
            }
        }
        Ok(query)
    }

    fn matches(&self, data: &Map<String, Value>) -> bool {
        self.filters.iter().all(|(column, expected)| match data.get(column) {
            Some(Value::String(s)) => s == expected,
            Some(Value::Number(n)) => n.to_string() == *expected,
            Some(Value::Bool(b)) => b.to_string() == *expected,
            _ => false,
        })
    }

    fn apply(&self, rows: Vec<Row>) -> Vec<Value> {
        let mut rows: Vec<Row> = rows.into_iter().filter(|r| self.matches(&r.data)).collect();
        match &self.order {
            Some((column, descending)) => rows.sort_by(|a, b| {
                let ordering = compare(a.data.get(column), b.data.get(column)).then(a.seq.cmp(&b.seq));
                if *descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            }),
            None => rows.sort_by_key(|r| r.seq),
        }
        rows.into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .map(|row| match &self.select {
                Some(columns) => {
                    let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                    Value::Object(project(&row.data, Some(columns.as_slice())))
                }
                None => Value::Object(row.data),
            })
            .collect()
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize, PgError> {
    value.parse().map_err(|_| {
        PgError::new(
            StatusCode::BAD_REQUEST,
            "PGRST103",
            format!("\"{value}\" is not a valid {key}"),
        )
    })
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Null) | None, Some(Value::Null) | None) => Ordering::Equal,
        (Some(Value::Null) | None, _) => Ordering::Less,
        (_, Some(Value::Null) | None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

//! HTTP surface of the books module, mounted under `/api/books`.

mod params;

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};

use bookstore_authz::{Authorizer, Capability, Principal};
use bookstore_http::{ApiResponse, AppError};

use super::catalog::CatalogStore;
use super::models::{BookChanges, NewBook};
use super::query::QueryService;

use params::{ListQuery, ListRequest};

/// Shared handler state.
#[derive(Clone)]
pub struct BooksState {
    pub catalog: Arc<dyn CatalogStore>,
    pub queries: QueryService,
    pub authorizer: Arc<dyn Authorizer>,
}

pub fn router(state: BooksState) -> Router {
    Router::new()
        .route("/", get(list_books).post(create_book))
        .route("/count", get(count_books))
        .route("/health", get(health_check))
        .route("/{id}", get(get_book).put(update_book).delete(delete_book))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct Pagination {
    page: u64,
    limit: usize,
    total: usize,
    pages: usize,
}

#[derive(Debug, Serialize)]
struct OffsetListing {
    items: Vec<Value>,
    pagination: Pagination,
}

/// Check the bearer credential on the request against `capability`.
fn authorize(
    state: &BooksState,
    headers: &HeaderMap,
    capability: Capability,
) -> Result<Principal, AppError> {
    let credential = match headers.get(AUTHORIZATION) {
        None => None,
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| AppError::unauthorized("malformed authorization header"))?;
            let token = value
                .strip_prefix("Bearer ")
                .ok_or_else(|| AppError::unauthorized("expected a bearer token"))?;
            Some(token.trim())
        }
    };
    Ok(state.authorizer.authorize(credential, capability)?)
}

fn query_params(query: Result<Query<ListQuery>, QueryRejection>) -> Result<ListQuery, AppError> {
    query
        .map(|Query(query)| query)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

/// Malformed JSON is a bad request; field types are checked by the payload readers.
fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, AppError> {
    body.map(|Json(body)| body)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

async fn list_books(
    State(state): State<BooksState>,
    headers: HeaderMap,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    authorize(&state, &headers, Capability::ReadCatalog)?;

    match query_params(query)?.into_request()? {
        ListRequest::Offset(params) => {
            let filter = params.filter.clone();
            let timeout = params.timeout;
            let (page, total) = tokio::try_join!(
                state.queries.list_offset(params),
                state.queries.count(&filter, timeout),
            )?;
            let listing = OffsetListing {
                pagination: Pagination {
                    page: page.page,
                    limit: page.limit,
                    total,
                    pages: total.div_ceil(page.limit),
                },
                items: page.items,
            };
            Ok(ApiResponse::ok(listing).into_response())
        }
        ListRequest::Cursor(params) => {
            let page = state.queries.list_cursor(params).await?;
            Ok(ApiResponse::ok(page).into_response())
        }
    }
}

async fn count_books(
    State(state): State<BooksState>,
    headers: HeaderMap,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<ApiResponse<Value>, AppError> {
    authorize(&state, &headers, Capability::ReadCatalog)?;
    let filter = query_params(query)?.filter();
    let count = state.queries.count(&filter, None).await?;
    Ok(ApiResponse::ok(json!({ "count": count })))
}

async fn get_book(
    State(state): State<BooksState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    authorize(&state, &headers, Capability::ReadCatalog)?;
    let book = state.catalog.fetch_by_id(&id).await?;
    Ok(ApiResponse::ok(book).into_response())
}

async fn create_book(
    State(state): State<BooksState>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let principal = authorize(&state, &headers, Capability::ManageCatalog)?;
    let book = NewBook::from_body(json_body(body)?)?.validate()?;
    let created = state.catalog.insert(book).await?;
    tracing::debug!(subject = %principal.subject, book_id = %created.id, "create request served");
    Ok(ApiResponse::created(created).into_response())
}

async fn update_book(
    State(state): State<BooksState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let principal = authorize(&state, &headers, Capability::ManageCatalog)?;
    let changes = BookChanges::from_body(json_body(body)?)?.validate()?;
    let updated = state.catalog.update_by_id(&id, changes).await?;
    tracing::debug!(subject = %principal.subject, book_id = %id, "update request served");
    Ok(ApiResponse::ok(updated).into_response())
}

async fn delete_book(
    State(state): State<BooksState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<ApiResponse<Value>, AppError> {
    let principal = authorize(&state, &headers, Capability::ManageCatalog)?;
    state.catalog.delete_by_id(&id).await?;
    tracing::debug!(subject = %principal.subject, book_id = %id, "delete request served");
    Ok(ApiResponse::ok(json!({ "id": id })))
}

async fn health_check() -> &'static str {
    "books module is healthy"
}

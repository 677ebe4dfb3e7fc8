use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use objstore_db::{parse_key, ObjectRecord, Page};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::server::{ApiError, AppState};

/// Request body for `POST /object`. A `key` sent by the client is ignored.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateObjectBody {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ObjectResponse {
    pub key: u64,
    pub value: String,
}

impl From<ObjectRecord> for ObjectResponse {
    fn from(record: ObjectRecord) -> Self {
        Self {
            key: record.key,
            value: record.value,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListObjectsQuery {
    /// Maximum number of objects to return; all when omitted.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Number of objects to skip in key order.
    #[serde(default)]
    pub offset: Option<u64>,
}

impl ListObjectsQuery {
    fn into_page(self) -> Result<Page, ApiError> {
        if self.limit == Some(0) {
            return Err(ApiError::bad_request("limit must be greater than zero"));
        }
        Ok(Page {
            limit: self.limit,
            offset: self.offset.unwrap_or(0),
        })
    }
}

#[utoipa::path(
    get,
    path = "/objects",
    params(ListObjectsQuery),
    responses(
        (status = 200, description = "Objects ordered by key", body = [ObjectResponse]),
        (status = 400, description = "Invalid paging parameters", body = crate::server::ErrorBody),
        (status = 500, description = "Storage failure", body = crate::server::ErrorBody)
    )
)]
pub(crate) async fn list_objects(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListObjectsQuery>, QueryRejection>,
) -> Result<Json<Vec<ObjectResponse>>, ApiError> {
    let Query(query) = query.map_err(|rejection| {
        ApiError::bad_request("invalid query parameters").with_error(rejection.body_text())
    })?;
    let page = query.into_page()?;

    let records = state
        .db
        .list_objects(page)
        .await
        .map_err(|err| ApiError::internal("failed to select objects from database", err))?;

    info!(count = records.len(), "got objects from database");
    Ok(Json(records.into_iter().map(ObjectResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/object/{key}",
    params(("key" = u64, Path, description = "Object key")),
    responses(
        (status = 200, description = "Object found", body = ObjectResponse),
        (status = 400, description = "Key is not an unsigned 64-bit integer", body = crate::server::ErrorBody),
        (status = 404, description = "Object not found", body = crate::server::ErrorBody),
        (status = 500, description = "Storage failure", body = crate::server::ErrorBody)
    )
)]
pub(crate) async fn get_object(
    State(state): State<Arc<AppState>>,
    Path(raw_key): Path<String>,
) -> Result<Json<ObjectResponse>, ApiError> {
    let key = parse_key(&raw_key).map_err(ApiError::from)?;

    let record = state
        .db
        .fetch_object(key)
        .await
        .map_err(|err| ApiError::internal("failed to get object from database", err))?
        .ok_or_else(|| ApiError::not_found("object not found in database"))?;

    info!(key = record.key, value = %record.value, "got object from database");
    Ok(Json(ObjectResponse::from(record)))
}

#[utoipa::path(
    post,
    path = "/object",
    request_body = CreateObjectBody,
    responses(
        (status = 200, description = "Object stored with its assigned key", body = ObjectResponse),
        (status = 400, description = "Malformed request body", body = crate::server::ErrorBody),
        (status = 413, description = "Value exceeds the configured maximum size", body = crate::server::ErrorBody),
        (status = 500, description = "Storage failure", body = crate::server::ErrorBody)
    )
)]
pub(crate) async fn create_object(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateObjectBody>, JsonRejection>,
) -> Result<Json<ObjectResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            let message = match state.db.max_value_size() {
                Some(max) => format!("payload max size is {max}"),
                None => "request body too large".to_string(),
            };
            return ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, message)
                .with_error(rejection.body_text());
        }
        ApiError::bad_request("invalid request body").with_error(rejection.body_text())
    })?;

    let record = state
        .db
        .insert_object(&payload.value)
        .await
        .map_err(|err| ApiError::storage("couldn't insert object into database", err))?;

    info!(key = record.key, value = %record.value, "object inserted into database");
    Ok(Json(ObjectResponse::from(record)))
}

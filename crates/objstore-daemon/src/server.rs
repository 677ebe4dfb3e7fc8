use std::sync::Arc;

use crate::config::AppConfig;
use crate::models::{create_object, get_object, list_objects};
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use objstore_db::{Database, ObjectError};
use serde::Serialize;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};
use utoipa::{OpenApi, ToSchema};

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;

    let db = Database::connect_with(&config.db_url, config.db_options)
        .await
        .with_context(|| format!("failed to open database {}", config.db_url))?;
    info!(
        database = %config.db_url,
        max_value_size = ?config.db_options.max_value_size,
        "database opened"
    );

    let state = Arc::new(AppState::new(db.clone()));

    let app = build_router(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listen socket")?;

    info!(addr = %config.listen_addr, "starting HTTP server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server exited")?;

    db.close().await;
    info!("database closed");
    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = body_limit(state.db.max_value_size());

    Router::new()
        .route("/ping", get(ping))
        .route("/object", post(create_object))
        .route("/object/:key", get(get_object))
        .route("/objects", get(list_objects))
        .route("/openapi.json", get(openapi_json))
        .layer(body_limit)
        .with_state(state)
}

/// axum's own default request body cap.
const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Request body cap derived from the value limit. A JSON-escaped byte can take
/// up to six bytes on the wire, plus room for the `{"value": ...}` wrapper.
fn body_limit(max_value_size: Option<usize>) -> DefaultBodyLimit {
    match max_value_size {
        Some(max) => DefaultBodyLimit::max(
            max.saturating_mul(6)
                .saturating_add(1024)
                .max(DEFAULT_BODY_LIMIT),
        ),
        None => DefaultBodyLimit::disable(),
    }
}

/// Shared handler state. The database handle is the only thing requests share.
#[derive(Clone, Debug)]
pub struct AppState {
    pub db: Database,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining requests");
}

#[utoipa::path(
    get,
    path = "/ping",
    responses(
        (status = 200, description = "Database is reachable", body = String),
        (status = 500, description = "Database is unreachable", body = ErrorBody)
    )
)]
async fn ping(State(state): State<Arc<AppState>>) -> Result<Json<&'static str>, ApiError> {
    state
        .db
        .ping()
        .await
        .map_err(|err| ApiError::internal("failed to ping database", err))?;
    Ok(Json("PONG"))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(docs::ApiDoc::openapi())
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    error: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal<E: std::fmt::Display>(message: impl Into<String>, err: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message).with_error(format!("{err:#}"))
    }

    /// Classifies a storage error: domain failures map to client statuses,
    /// everything else is a 500.
    pub fn storage(message: impl Into<String>, err: anyhow::Error) -> Self {
        match err.downcast_ref::<ObjectError>() {
            Some(object_err) if !matches!(object_err, ObjectError::KeyOutOfRange(_)) => {
                ApiError::from(object_err.clone())
            }
            _ => ApiError::internal(message, err),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ObjectError> for ApiError {
    fn from(err: ObjectError) -> Self {
        match err {
            ObjectError::ValueTooLarge { .. } => {
                ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            ObjectError::InvalidKey(_) => {
                ApiError::bad_request("object key must be an unsigned 64-bit integer")
                    .with_error(err.to_string())
            }
            ObjectError::KeyOutOfRange(_) => {
                ApiError::internal("couldn't read last insertion from database", err)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, error = ?self.error, "api error");
        } else {
            warn!(status = %self.status, message = %self.message, error = ?self.error, "api error");
        }
        let body = Json(ErrorBody {
            status: self.status.as_u16(),
            message: self.message,
            error: self.error,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    status: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub mod docs {
    use utoipa::OpenApi;

    use crate::models::{CreateObjectBody, ObjectResponse};

    use super::ErrorBody;

    #[derive(OpenApi)]
    #[openapi(
        info(title = "objstore", description = "Key/value object store backed by SQLite"),
        paths(
            super::ping,
            crate::models::create_object,
            crate::models::get_object,
            crate::models::list_objects
        ),
        components(schemas(CreateObjectBody, ObjectResponse, ErrorBody))
    )]
    pub struct ApiDoc;
}

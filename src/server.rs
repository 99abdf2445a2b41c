//! HTTP command API.
//!
//! Exposes the courier's operations as a small JSON API for the external
//! messaging frontend (the bot process that owns the chat transport calls
//! these endpoints; command routing itself lives there, not here).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/documents` | List library files with processing state |
//! | `POST` | `/users/{id}/select` | Select a document for a user |
//! | `POST` | `/users/{id}/next` | Deliver the next excerpt now |
//! | `GET`  | `/users/{id}/schedule` | Show the user's schedule |
//! | `PUT`  | `/users/{id}/schedule` | Set or replace the schedule |
//! | `POST` | `/users/{id}/schedule/pause` | Pause automatic deliveries |
//! | `POST` | `/users/{id}/schedule/resume` | Resume automatic deliveries |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "unknown timezone 'X'" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `not_ready` (409),
//! `delivery_failed` (502), `internal` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::app::App;
use crate::deliver::{DeliverError, Delivered};
use crate::error::{ProcessingError, ValidationError};

#[derive(Clone)]
struct AppState {
    app: Arc<App>,
}

/// Start the HTTP API on the configured bind address. Runs until the
/// process shuts down.
pub async fn run_server(app: Arc<App>) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let state = AppState { app };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(health))
        .route("/documents", get(list_documents))
        .route("/users/{id}/select", post(select_document))
        .route("/users/{id}/next", post(deliver_next))
        .route("/users/{id}/schedule", get(show_schedule).put(set_schedule))
        .route("/users/{id}/schedule/pause", post(pause_schedule))
        .route("/users/{id}/schedule/resume", post(resume_schedule))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %bind_addr, "HTTP API listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": { "code": self.code, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

/// Map operation failures onto the error contract. Validation problems are
/// the caller's fault; processing/delivery failures carry their own codes;
/// anything else is internal.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(v) = err.downcast_ref::<ValidationError>() {
            let status = match v {
                ValidationError::UnknownDocument(_)
                | ValidationError::UnknownUser(_)
                | ValidationError::NoSchedule(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_REQUEST,
            };
            let code = if status == StatusCode::NOT_FOUND {
                "not_found"
            } else {
                "bad_request"
            };
            return ApiError::new(status, code, v.to_string());
        }
        if let Some(p) = err.downcast_ref::<ProcessingError>() {
            return ApiError::new(StatusCode::CONFLICT, "not_ready", p.to_string());
        }
        match err.downcast_ref::<DeliverError>() {
            Some(d @ DeliverError::NothingSelected(_)) => {
                ApiError::new(StatusCode::NOT_FOUND, "not_found", d.to_string())
            }
            Some(d @ DeliverError::DocumentNotReady(_)) => {
                ApiError::new(StatusCode::CONFLICT, "not_ready", d.to_string())
            }
            Some(d @ DeliverError::ChannelFailed { .. }) => {
                ApiError::new(StatusCode::BAD_GATEWAY, "delivery_failed", d.to_string())
            }
            _ => {
                tracing::error!(error = %err, "internal error");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error",
                )
            }
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn list_documents(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = state.app.list_library().await?;
    Ok(Json(json!({ "documents": entries })))
}

#[derive(Deserialize)]
struct SelectBody {
    name: String,
}

async fn select_document(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(body): Json<SelectBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let selected = state.app.select(user_id, &body.name).await?;
    Ok(Json(json!({ "selected": selected })))
}

async fn deliver_next(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = state.app.deliver_now(user_id).await?;
    let body = match outcome {
        Delivered::Excerpt {
            position,
            total,
            completed,
        } => json!({
            "delivered": { "position": position, "total": total, "completed": completed }
        }),
        Delivered::NoFurtherContent => json!({ "delivered": null, "message": "no further content" }),
    };
    Ok(Json(body))
}

#[derive(Deserialize)]
struct ScheduleBody {
    time_of_day: String,
    frequency: String,
    timezone: String,
}

async fn set_schedule(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(body): Json<ScheduleBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let schedule = state
        .app
        .set_schedule(user_id, &body.time_of_day, &body.frequency, &body.timezone)
        .await?;
    Ok(Json(json!({ "schedule": schedule })))
}

async fn show_schedule(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let schedule = state.app.get_schedule(user_id).await?;
    match schedule {
        Some(s) => Ok(Json(json!({ "schedule": s }))),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no schedule exists for user {user_id}"),
        )),
    }
}

async fn pause_schedule(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let schedule = state.app.pause_schedule(user_id).await?;
    Ok(Json(json!({ "schedule": schedule })))
}

async fn resume_schedule(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let schedule = state.app.resume_schedule(user_id).await?;
    Ok(Json(json!({ "schedule": schedule })))
}

//! HTTP surface: `POST /api/build`, `POST /api/revise`, `GET /health`.
//!
//! Handlers do the synchronous half only (validation and the secret check),
//! hand the request to a detached pipeline run, and answer `202` at once.
//! The real result reaches the caller through the evaluation callback.

use std::any::Any;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::pipeline::{Pipeline, timestamp};
use crate::request::{self, Round};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/build", post(build))
        .route("/api/revise", post(revise))
        .route("/health", get(health))
        // Attachments arrive inline as data URIs.
        .layer(axum::extract::DefaultBodyLimit::max(12 * 1024 * 1024))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn build(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    accept(&state, body, Round::Build)
}

async fn revise(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    accept(&state, body, Round::Revise)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "message": "Server is running" }))
}

fn accept(state: &AppState, body: Result<Json<Value>, JsonRejection>, round: Round) -> Response {
    let raw = match body {
        Ok(Json(raw)) => raw,
        Err(rejection) => {
            tracing::warn!(%round, error = %rejection, "Rejected unreadable request body");
            return invalid_request(round, rejection.body_text(), None);
        }
    };

    let request = match request::validate(&raw, round) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(%round, field = ?e.field(), error = %e, "Rejected invalid request");
            return invalid_request(round, e.to_string(), e.field());
        }
    };

    if state.pipeline.authorize(&request.secret).is_err() {
        tracing::warn!(task = %request.task, %round, "Rejected request with invalid secret");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Invalid secret" })),
        )
            .into_response();
    }

    let message = match round {
        Round::Build => "Build request accepted and processing",
        Round::Revise => "Revision request accepted and processing",
    };
    let ack = json!({
        "success": true,
        "message": message,
        "task": &request.task,
        "round": round.number(),
        "timestamp": timestamp(),
    });

    tracing::info!(task = %request.task, email = %request.email, %round, "Request accepted");
    state.pipeline.spawn(request);

    (StatusCode::ACCEPTED, Json(ack)).into_response()
}

/// Rejection before the acknowledgment. Same shape as any other failure of
/// the synchronous phase, plus the offending field.
fn invalid_request(round: Round, message: String, field: Option<&str>) -> Response {
    let error = match round {
        Round::Build => "Build processing failed",
        Round::Revise => "Revision processing failed",
    };
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": error,
            "message": message,
            "field": field,
        })),
    )
        .into_response()
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(%message, "Request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Request processing failed", "message": message })),
    )
        .into_response()
}

//! HTTP front end.
//!
//! | Method | Path                                        | Answer |
//! |--------|---------------------------------------------|--------|
//! | POST   | `/cas/{ca_alias}/bulk-certificates`         | 202 + `Location` |
//! | GET    | `/bulk-certificates/{task_id}`              | status JSON |
//! | GET    | `/bulk-certificates/{task_id}/artifacts`    | 303 while pending, zip or `{links}` |
//! | DELETE | `/bulk-certificates/{task_id}/artifacts`    | `{deleted}` |
//! | POST   | `/bulk-certificates/{task_id}/replay`       | `{republished}` |
//!
//! Errors are `{ "error": KIND, "message": ... }` with the status code of
//! the underlying [`BulkError`].

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::aggregator::StatusAggregator;
use crate::assembler::{ArtifactAssembler, Artifacts, RetrievalMode};
use crate::domain::{CertInfo, TaskState, TaskStatusView};
use crate::error::BulkError;
use crate::splitter::{BulkRequest, TaskSplitter};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Accepts bulk requests.
    pub splitter: TaskSplitter,
    /// Answers status queries.
    pub aggregator: StatusAggregator,
    /// Serves and deletes artifacts.
    pub assembler: ArtifactAssembler,
}

/// Builds the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/cas/{ca_alias}/bulk-certificates", post(submit))
        .route("/bulk-certificates/{task_id}", get(status))
        .route(
            "/bulk-certificates/{task_id}/artifacts",
            get(get_artifacts).delete(delete_artifacts),
        )
        .route("/bulk-certificates/{task_id}/replay", post(replay))
        .with_state(state)
}

/// [`BulkError`] rendered as a JSON response.
#[derive(Debug)]
pub struct ApiError(pub BulkError);

impl From<BulkError> for ApiError {
    fn from(err: BulkError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(json!({
                "error": self.0.kind(),
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}

fn status_path(task_id: &str) -> String {
    format!("/bulk-certificates/{task_id}")
}

/// Body of the bulk issuance request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    /// Certificates requested.
    pub quantity: i64,
    /// Subject template.
    #[serde(default)]
    pub cert_info: CertInfo,
}

async fn submit(
    State(state): State<Arc<AppState>>,
    Path(ca_alias): Path<String>,
    Json(body): Json<SubmitBody>,
) -> Result<Response, ApiError> {
    let accepted = state
        .splitter
        .submit(BulkRequest {
            quantity: body.quantity,
            ca_alias,
            cert_info: body.cert_info,
        })
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, status_path(&accepted.task_id))],
        Json(json!({
            "taskId": accepted.task_id,
            "status": "in_progress",
        })),
    )
        .into_response())
}

async fn status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusView>, ApiError> {
    Ok(Json(state.aggregator.status(&task_id).await?))
}

#[derive(Debug, Default, Deserialize)]
struct ArtifactQuery {
    #[serde(default)]
    links: bool,
}

async fn get_artifacts(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    Query(query): Query<ArtifactQuery>,
) -> Result<Response, ApiError> {
    let view = state.aggregator.status(&task_id).await?;
    if view.status == TaskState::Pending {
        return Ok(Redirect::to(&status_path(&task_id)).into_response());
    }

    let mode = if query.links {
        RetrievalMode::Links
    } else {
        RetrievalMode::Bundle
    };
    match state.assembler.get_artifacts(&task_id, mode).await? {
        Some(Artifacts::Links(links)) => Ok(Json(json!({ "links": links })).into_response()),
        Some(Artifacts::Bundle(path)) => {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| BulkError::upstream("bundle storage", e.to_string()))?;
            drop(path);
            Ok((
                [
                    (header::CONTENT_TYPE, "application/zip".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{task_id}.zip\""),
                    ),
                ],
                bytes,
            )
                .into_response())
        },
        None => {
            let reason = "a chunk archive is missing from the store";
            Err(BulkError::not_found(&task_id, reason).into())
        },
    }
}

async fn delete_artifacts(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state.assembler.delete_batch(&task_id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn replay(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let republished = state.splitter.replay_pending(&task_id).await?;
    Ok(Json(json!({ "republished": republished })))
}

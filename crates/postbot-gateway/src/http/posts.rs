//! Post endpoints.
//!
//! - `POST /posts`: schedule a post. Media arrives as a base64 data URL.
//! - `GET  /posts`: credential-free snapshots, in creation order.
//! - `GET  /posts/{id}/media`: the stored media with its content type.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use postbot_core::{Credential, MediaBlob, PostId, PostSnapshot};
use postbot_scheduler::{ScheduleRequest, SchedulerError};
use postbot_store::StoreError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::app::AppState;

#[derive(Deserialize)]
pub struct CreatePostRequest {
    /// Optional caller-chosen id.
    #[serde(default)]
    pub id: Option<String>,
    /// `data:<mime>;base64,<payload>`
    pub media_url: String,
    /// RFC 3339 timestamp.
    pub schedule_time: String,
    #[serde(default)]
    pub access_token: String,
}

#[derive(Serialize)]
pub struct CreatePostReply {
    pub id: PostId,
}

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: &'static str,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

/// POST /posts
pub async fn create_post(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreatePostRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreatePostReply>)> {
    let Json(req) = body.map_err(body_rejection)?;
    let media = parse_data_url(&req.media_url)
        .map_err(|reason| api_error(StatusCode::BAD_REQUEST, "INVALID_MEDIA", reason))?;
    let schedule_time = DateTime::parse_from_rfc3339(&req.schedule_time)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            api_error(
                StatusCode::BAD_REQUEST,
                "INVALID_SCHEDULE",
                format!("schedule_time must be RFC 3339: {e}"),
            )
        })?;

    let id = state
        .scheduler
        .schedule_post(ScheduleRequest {
            id: req.id.filter(|id| !id.is_empty()).map(PostId::from),
            media,
            schedule_time,
            credential: Credential::new(req.access_token),
        })
        .map_err(scheduler_error)?;

    Ok((StatusCode::CREATED, Json(CreatePostReply { id })))
}

/// GET /posts
pub async fn list_posts(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<PostSnapshot>>> {
    state
        .scheduler
        .list_posts()
        .map(Json)
        .map_err(scheduler_error)
}

/// GET /posts/{id}/media
pub async fn post_media(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let media = state
        .scheduler
        .media(&PostId::from(id))
        .map_err(scheduler_error)?;
    Ok(([(header::CONTENT_TYPE, media.mime_type)], media.bytes).into_response())
}

/// Decode `data:<mime>[;param...];base64,<payload>` into a blob.
pub fn parse_data_url(url: &str) -> Result<MediaBlob, String> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| "media_url must be a data: URL".to_string())?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| "data URL has no payload".to_string())?;
    let meta = meta
        .strip_suffix(";base64")
        .ok_or_else(|| "data URL must be base64-encoded".to_string())?;
    let mime_type = meta.split(';').next().unwrap_or_default().trim();
    if mime_type.is_empty() {
        return Err("data URL has no media type".to_string());
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| format!("invalid base64 payload: {e}"))?;
    Ok(MediaBlob::new(mime_type.to_ascii_lowercase(), bytes))
}

fn scheduler_error(e: SchedulerError) -> (StatusCode, Json<ApiError>) {
    let status = match &e {
        SchedulerError::InvalidSchedule(_) | SchedulerError::InvalidMedia(_) => {
            StatusCode::BAD_REQUEST
        }
        SchedulerError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        SchedulerError::Store(StoreError::DuplicateId { .. }) => StatusCode::CONFLICT,
        SchedulerError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        SchedulerError::Store(_) => {
            error!("store error while serving request: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, e.code(), e.to_string())
}

/// Body limit hits keep the API's error shape instead of axum's plain text.
fn body_rejection(rejection: JsonRejection) -> (StatusCode, Json<ApiError>) {
    let status = rejection.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "PAYLOAD_TOO_LARGE"
    } else {
        "INVALID_REQUEST"
    };
    api_error(status, code, rejection.body_text())
}

fn api_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: message.into(),
            code,
        }),
    )
}

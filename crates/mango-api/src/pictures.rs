use axum::{
    Extension, Json,
    body::{self, Body},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;
use http_body_util::LengthLimitError;
use tracing::{error, info, warn};
use uuid::Uuid;

use mango_db::models::PictureRow;
use mango_types::api::{PictureList, PictureQuery};

use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};
use crate::middleware::CurrentUser;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Buffer an upload body, refusing anything over `limit` bytes.
async fn read_upload(body: Body, limit: usize) -> ApiResult<Bytes> {
    body::to_bytes(body, limit).await.map_err(|e| {
        let source = e.into_inner();
        if source.is::<LengthLimitError>() {
            ApiError::PayloadTooLarge
        } else {
            ApiError::BadRequest(format!("Failed to read picture body: {}", source))
        }
    })
}

/// POST /pictures/add?tag= accepts the raw image bytes, stores them under
/// `{upload_dir}/{uuid}` and records the picture. The body is read here
/// rather than through an extractor so the size limit answers with
/// [`ApiError::PayloadTooLarge`].
pub async fn add_picture(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<PictureQuery>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<impl IntoResponse> {
    let bytes = read_upload(body, state.max_upload_bytes).await?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Picture body is empty".into()));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    let filename = Uuid::new_v4().to_string();
    let path = state.upload_dir.join(&filename);

    tokio::fs::create_dir_all(&state.upload_dir).await.map_err(|e| {
        error!("Failed to create upload directory: {}", e);
        ApiError::Internal(e.to_string())
    })?;
    tokio::fs::write(&path, &bytes).await.map_err(|e| {
        error!("Failed to write picture {}: {}", path.display(), e);
        ApiError::Internal(e.to_string())
    })?;

    let user_id = user.id;
    let size = bytes.len() as i64;
    let stored = filename.clone();
    let inserted = blocking(&state, move |db| {
        db.insert_picture(user_id, &stored, &query.tag, &content_type, size)
    })
    .await;

    let picture = match inserted {
        Ok(picture) => picture,
        Err(e) => {
            // Don't leave an orphaned file behind.
            if let Err(io) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove orphaned picture {}: {}", path.display(), io);
            }
            return Err(e);
        }
    };

    info!("Picture {} ({} bytes) uploaded by {}", picture.id, size, user_id);
    Ok((
        StatusCode::CREATED,
        Json(PictureList {
            pictures: vec![picture.into()],
        }),
    ))
}

pub async fn get_pictures(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Json<PictureList>> {
    let rows = blocking(&state, move |db| db.get_pictures_by_user(user.id)).await?;
    Ok(Json(PictureList {
        pictures: rows.into_iter().map(Into::into).collect(),
    }))
}

/// GET /pictures/{id} streams the stored bytes back with their content type.
pub async fn download_picture(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let picture = owned_picture(&state, id, user.id).await?;

    let path = state.upload_dir.join(&picture.filename);
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        error!("Failed to read picture {}: {}", path.display(), e);
        ApiError::NotFound
    })?;

    Ok(([(header::CONTENT_TYPE, picture.content_type)], bytes))
}

pub async fn delete_picture(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let picture = owned_picture(&state, id, user.id).await?;

    blocking(&state, move |db| db.delete_picture(id)).await?;

    let path = state.upload_dir.join(&picture.filename);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        warn!("Picture {} row deleted but file removal failed: {}", id, e);
    }

    info!("Picture {} deleted by {}", id, user.id);
    Ok(StatusCode::NO_CONTENT)
}

/// Pictures of other users are reported as missing.
async fn owned_picture(state: &AppState, id: i64, user_id: i64) -> ApiResult<PictureRow> {
    blocking(state, move |db| db.get_picture(id))
        .await?
        .filter(|p| p.user_id == user_id)
        .ok_or(ApiError::NotFound)
}

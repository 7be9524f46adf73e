use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;

use mango_db::models::NewRelease;
use mango_types::api::{ReleaseCreate, ReleaseCreated, ReleaseNameQuery, ReleaseRead};

use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};

pub async fn add_release(
    State(state): State<AppState>,
    Json(req): Json<ReleaseCreate>,
) -> ApiResult<impl IntoResponse> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Release name must not be empty".into()));
    }

    let row = blocking(&state, move |db| {
        db.insert_release(&NewRelease {
            name: &req.name,
            artist: &req.artist,
            genre: &req.genre,
            release_date: Utc::now(),
            story_text: &req.story_text,
            record_label: &req.record_label,
            filename: &req.filename,
            cover_id: req.cover_id,
        })
    })
    .await?;

    info!("Release {} ({}) added", row.name, row.id);
    Ok((
        StatusCode::CREATED,
        Json(ReleaseCreated {
            details: format!("{} successfully added", row.name),
            id: row.id,
        }),
    ))
}

pub async fn get_release(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ReleaseRead>> {
    let row = blocking(&state, move |db| db.get_release(id))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(row.into()))
}

pub async fn get_release_by_name(
    State(state): State<AppState>,
    Query(query): Query<ReleaseNameQuery>,
) -> ApiResult<Json<ReleaseRead>> {
    let row = blocking(&state, move |db| db.get_release_by_name(&query.release_name))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(row.into()))
}

pub async fn get_all_releases(State(state): State<AppState>) -> ApiResult<Json<Vec<ReleaseRead>>> {
    let rows = blocking(&state, |db| db.get_all_releases()).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

pub async fn delete_release(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !blocking(&state, move |db| db.delete_release(id)).await? {
        return Err(ApiError::NotFound);
    }

    info!("Release {} deleted", id);
    Ok(StatusCode::NO_CONTENT)
}

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{info, warn};
use validator::Validate;

use mango_db::models::UserChanges;
use mango_types::api::{UserRead, UserUpdate};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{CurrentUser, require_superuser};
use crate::{blocking, password};

pub async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<UserRead> {
    Json(user.into())
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(update): Json<UserUpdate>,
) -> ApiResult<Json<UserRead>> {
    apply_update(&state, user.id, update, false).await.map(Json)
}

pub async fn get_user(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<UserRead>> {
    require_superuser(&user)?;

    let found = blocking(&state, move |db| db.get_user_by_id(id))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(found.into()))
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(update): Json<UserUpdate>,
) -> ApiResult<Json<UserRead>> {
    require_superuser(&user)?;
    apply_update(&state, id, update, true).await.map(Json)
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    require_superuser(&user)?;

    // Picture rows go with the user through the foreign key; their files
    // have to be removed by hand.
    let pictures = blocking(&state, move |db| {
        let pictures = db.get_pictures_by_user(id)?;
        Ok(db.delete_user(id)?.then_some(pictures))
    })
    .await?
    .ok_or(ApiError::NotFound)?;

    for picture in &pictures {
        let path = state.upload_dir.join(&picture.filename);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!("Picture {} of deleted user {} left on disk: {}", picture.id, id, e);
        }
    }

    info!("User {} deleted by {} ({} pictures removed)", id, user.id, pictures.len());
    Ok(StatusCode::NO_CONTENT)
}

/// Greeting for the caller, kept for clients that check their session with it.
pub async fn current_user(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<String> {
    Json(format!(
        "Hello, {} email ={} phone={}",
        user.id, user.email, user.phone_number
    ))
}

/// Shared by `PATCH /users/me` and `PATCH /users/{id}`. Only the superuser
/// route may touch the account flags.
async fn apply_update(
    state: &AppState,
    id: i64,
    mut update: UserUpdate,
    privileged: bool,
) -> ApiResult<UserRead> {
    update.phone_number = update.phone_number.map(|p| p.trim().to_string());
    update.email = update.email.map(|e| e.trim().to_lowercase());
    update.validate()?;

    if !privileged {
        update.is_active = None;
        update.is_superuser = None;
        update.is_verified = None;
    }

    let updated = blocking(state, move |db| {
        if let Some(email) = &update.email {
            if db.get_user_by_email(email)?.is_some_and(|other| other.id != id) {
                return Ok(Err(ApiError::BadRequest(
                    "UPDATE_USER_EMAIL_ALREADY_EXISTS".into(),
                )));
            }
        }

        let changes = UserChanges {
            hashed_password: update.password.as_deref().map(password::hash).transpose()?,
            email: update.email,
            name: update.name,
            surname: update.surname,
            phone_number: update.phone_number,
            is_active: update.is_active,
            is_superuser: update.is_superuser,
            is_verified: update.is_verified,
        };
        Ok(db.update_user(id, &changes)?.ok_or(ApiError::NotFound))
    })
    .await??;

    Ok(updated.into())
}

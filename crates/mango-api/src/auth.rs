use std::path::PathBuf;
use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Duration;
use tracing::info;
use validator::Validate;

use mango_db::Database;
use mango_db::models::{NewUser, UserChanges};
use mango_gateway::Dispatcher;
use mango_types::api::{
    AUTH_AUDIENCE, Claims, EmailRequest, LoginRequest, RESET_AUDIENCE, RegisterRequest,
    ResetPasswordRequest, TokenResponse, UserRead, VERIFY_AUDIENCE, VerifyRequest,
};
use mango_types::config::Config;

use crate::completions::CompletionProvider;
use crate::error::{ApiError, ApiResult};
use crate::{blocking, password, tokens};

/// Lifetime of password-reset and verification tokens.
fn action_token_lifetime() -> Duration {
    Duration::hours(1)
}

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub jwt_lifetime: Duration,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub dev_endpoints: bool,
    pub completions: Option<Arc<dyn CompletionProvider>>,
}

impl AppStateInner {
    pub fn new(
        config: &Config,
        db: Database,
        dispatcher: Dispatcher,
        completions: Option<Arc<dyn CompletionProvider>>,
    ) -> Self {
        Self {
            db,
            dispatcher,
            jwt_secret: config.jwt_secret.clone(),
            jwt_lifetime: Duration::seconds(config.jwt_lifetime_secs),
            upload_dir: config.upload_dir.clone(),
            max_upload_bytes: config.max_upload_bytes,
            dev_endpoints: config.dev_endpoints,
            completions,
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn register(
    State(state): State<AppState>,
    Json(mut req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    req.phone_number = req.phone_number.trim().to_string();
    req.email = normalize_email(&req.email);
    req.validate()?;

    let created = blocking(&state, move |db| {
        if db.get_user_by_email(&req.email)?.is_some() {
            return Ok(None);
        }

        let hashed_password = password::hash(&req.password)?;

        // Privileges are never self-granted at registration.
        let user = db.create_user(&NewUser {
            email: &req.email,
            name: &req.name,
            surname: &req.surname,
            phone_number: &req.phone_number,
            hashed_password: &hashed_password,
            is_active: req.is_active,
            is_superuser: false,
            is_verified: false,
        })?;
        Ok(Some(user))
    })
    .await?
    .ok_or_else(|| ApiError::BadRequest("REGISTER_USER_ALREADY_EXISTS".into()))?;

    info!("Registered user {} ({})", created.email, created.id);
    Ok((StatusCode::CREATED, Json(UserRead::from(created))))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let email = normalize_email(&req.username);

    let user = blocking(&state, move |db| {
        let user = db
            .get_user_by_email(&email)?
            .filter(|user| user.is_active && password::verify(&req.password, &user.hashed_password));
        Ok(user)
    })
    .await?
    .ok_or_else(|| ApiError::BadRequest("LOGIN_BAD_CREDENTIALS".into()))?;

    let (access_token, _) = tokens::issue(
        &state.jwt_secret,
        user.id,
        &user.email,
        AUTH_AUDIENCE,
        state.jwt_lifetime,
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".into(),
    }))
}

/// Revoke the presented access token until it would have expired anyway.
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<StatusCode> {
    let jti = claims.jti.to_string();
    let exp = claims.exp as i64;
    blocking(&state, move |db| db.revoke_token(&jti, exp)).await?;

    info!("User {} logged out", claims.sub);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<EmailRequest>,
) -> ApiResult<StatusCode> {
    let email = normalize_email(&req.email);
    let user = blocking(&state, move |db| db.get_user_by_email(&email)).await?;

    // The answer is the same whether or not the account exists.
    if let Some(user) = user.filter(|u| u.is_active) {
        let (token, _) = tokens::issue(
            &state.jwt_secret,
            user.id,
            &user.email,
            RESET_AUDIENCE,
            action_token_lifetime(),
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;
        info!("User {} has forgot their password. Reset token: {}", user.id, token);
    }

    Ok(StatusCode::ACCEPTED)
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> ApiResult<Json<UserRead>> {
    req.validate()?;

    let bad_token = || ApiError::BadRequest("RESET_PASSWORD_BAD_TOKEN".into());
    let claims = tokens::verify(&state.jwt_secret, &req.token, RESET_AUDIENCE)
        .map_err(|_| bad_token())?;

    let user = blocking(&state, move |db| {
        let Some(user) = db.get_user_by_id(claims.sub)? else {
            return Ok(None);
        };
        if !user.is_active || user.email != claims.email {
            return Ok(None);
        }

        let changes = UserChanges {
            hashed_password: Some(password::hash(&req.password)?),
            ..Default::default()
        };
        db.update_user(user.id, &changes)
    })
    .await?
    .ok_or_else(bad_token)?;

    info!("User {} has reset their password", user.id);
    Ok(Json(user.into()))
}

pub async fn request_verify_token(
    State(state): State<AppState>,
    Json(req): Json<EmailRequest>,
) -> ApiResult<StatusCode> {
    let email = normalize_email(&req.email);
    let user = blocking(&state, move |db| db.get_user_by_email(&email)).await?;

    if let Some(user) = user.filter(|u| u.is_active && !u.is_verified) {
        let (token, _) = tokens::issue(
            &state.jwt_secret,
            user.id,
            &user.email,
            VERIFY_AUDIENCE,
            action_token_lifetime(),
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;
        info!("Verification requested for user {}. Verification token: {}", user.id, token);
    }

    Ok(StatusCode::ACCEPTED)
}

pub async fn verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> ApiResult<Json<UserRead>> {
    let bad_token = || ApiError::BadRequest("VERIFY_USER_BAD_TOKEN".into());
    let claims =
        tokens::verify(&state.jwt_secret, &req.token, VERIFY_AUDIENCE).map_err(|_| bad_token())?;

    let user = blocking(&state, move |db| db.get_user_by_id(claims.sub))
        .await?
        .filter(|u| u.email == claims.email)
        .ok_or_else(bad_token)?;

    if user.is_verified {
        return Err(ApiError::BadRequest("VERIFY_USER_ALREADY_VERIFIED".into()));
    }

    let id = user.id;
    let changes = UserChanges {
        is_verified: Some(true),
        ..Default::default()
    };
    let user = blocking(&state, move |db| db.update_user(id, &changes))
        .await?
        .ok_or(ApiError::NotFound)?;

    info!("User {} has been verified", user.id);
    Ok(Json(user.into()))
}

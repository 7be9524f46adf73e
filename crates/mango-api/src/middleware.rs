use axum::{
    extract::{FromRequestParts, Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use mango_db::models::UserRow;
use mango_types::api::{AUTH_AUDIENCE, Claims};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::{blocking, tokens};

/// The authenticated, active user behind the current request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRow);

/// Extract and validate the bearer JWT, then load the active user it names.
pub async fn require_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> ApiResult<Response> {
    let (mut parts, body) = req.into_parts();
    let TypedHeader(Authorization(bearer)) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(&mut parts, &state)
            .await
            .map_err(|_| ApiError::Unauthorized)?;

    let (claims, user) = authenticate(&state, bearer.token()).await?;

    let mut req = Request::from_parts(parts, body);
    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

/// Resolve an access token to its claims and user. Fails for bad or revoked
/// tokens and for users that are gone or inactive.
pub async fn authenticate(state: &AppState, token: &str) -> ApiResult<(Claims, UserRow)> {
    let claims = tokens::verify(&state.jwt_secret, token, AUTH_AUDIENCE)
        .map_err(|_| ApiError::Unauthorized)?;

    let jti = claims.jti.to_string();
    let user_id = claims.sub;
    let user = blocking(state, move |db| {
        if db.is_token_revoked(&jti)? {
            return Ok(None);
        }
        db.get_user_by_id(user_id)
    })
    .await?
    .filter(|user| user.is_active)
    .ok_or(ApiError::Unauthorized)?;

    Ok((claims, user))
}

pub fn require_superuser(user: &UserRow) -> ApiResult<()> {
    if user.is_superuser {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

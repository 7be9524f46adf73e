use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use tracing::warn;

use mango_db::schema;
use mango_types::api::{AUTH_AUDIENCE, DropQuery, MessageBody};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::{blocking, tokens};

/// POST /drop_all?command= is a development helper. It stays invisible (404)
/// unless dev endpoints are enabled and the caller is a superuser.
///
/// The route sits outside the regular auth middleware: after `drop_all` the
/// tables that middleware reads are gone, and `create_all` must still be
/// reachable.
pub async fn drop_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DropQuery>,
) -> ApiResult<Json<MessageBody>> {
    if !state.dev_endpoints {
        return Err(ApiError::NotFound);
    }

    let caller = schema_admin(&state, &headers).await?;
    warn!("User {} issued schema command '{}'", caller, query.command);

    let message = match query.command.as_str() {
        "drop_all" => {
            blocking(&state, |db| db.with_conn(schema::drop_all)).await?;
            "Database and tables dropped".to_string()
        }
        "create_all" => {
            blocking(&state, |db| db.with_conn(schema::create_all)).await?;
            "Database and new tables migrated".to_string()
        }
        table => {
            if !schema::TABLES.contains(&table) {
                return Err(ApiError::BadRequest(format!("Unknown table: {}", table)));
            }
            let name = table.to_string();
            blocking(&state, move |db| db.with_conn(|conn| schema::drop_table(conn, &name)))
                .await?;
            format!("Table {} dropped", table)
        }
    };

    Ok(Json(MessageBody { message }))
}

/// Check the caller of a schema command against whatever is left of the
/// schema. Revocation is enforced while `revoked_tokens` exists and the
/// superuser flag while `users` exists; with `users` gone any valid access
/// token may rebuild the tables. Returns the caller's user id.
async fn schema_admin(state: &AppState, headers: &HeaderMap) -> ApiResult<i64> {
    let Authorization(bearer) = headers
        .typed_get::<Authorization<Bearer>>()
        .ok_or(ApiError::Unauthorized)?;
    let claims = tokens::verify(&state.jwt_secret, bearer.token(), AUTH_AUDIENCE)
        .map_err(|_| ApiError::Unauthorized)?;

    let jti = claims.jti.to_string();
    let user_id = claims.sub;
    blocking(state, move |db| {
        let (has_revoked, has_users) = db.with_conn(|conn| {
            Ok((
                schema::table_exists(conn, "revoked_tokens")?,
                schema::table_exists(conn, "users")?,
            ))
        })?;

        if has_revoked && db.is_token_revoked(&jti)? {
            return Ok(Err(ApiError::Unauthorized));
        }
        if !has_users {
            warn!("Users table missing, accepting token of user {} for schema command", user_id);
            return Ok(Ok(user_id));
        }

        Ok(match db.get_user_by_id(user_id)?.filter(|u| u.is_active) {
            None => Err(ApiError::Unauthorized),
            Some(user) if !user.is_superuser => Err(ApiError::NotFound),
            Some(user) => Ok(user.id),
        })
    })
    .await?
}

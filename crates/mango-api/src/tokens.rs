use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use mango_types::api::Claims;

/// Sign a token for `user_id` valid for `lifetime` and scoped to `audience`.
pub fn issue(
    secret: &str,
    user_id: i64,
    email: &str,
    audience: &str,
    lifetime: Duration,
) -> Result<(String, Claims)> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        aud: audience.to_string(),
        jti: Uuid::new_v4(),
        exp: (Utc::now() + lifetime).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, claims))
}

/// Verify signature, expiry and audience.
pub fn verify(secret: &str, token: &str, audience: &str) -> Result<Claims> {
    let mut validation = Validation::default();
    validation.set_audience(&[audience]);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;

    Ok(data.claims)
}

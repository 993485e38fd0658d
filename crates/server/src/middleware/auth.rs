use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use chrono::{TimeZone, Utc};
use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::{
    db::models::Role,
    error::{AppError, AuthError, Result},
    AppState,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub role: Role,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: String,
    pub role: Role,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .map(|h| h.strip_prefix("Bearer ").unwrap_or(h))
        .ok_or(AuthError::NoToken)?;

    let claims = verify_token(token, &state.config.jwt_secret)?;

    request.extensions_mut().insert(AuthUser {
        id: claims.sub,
        role: claims.role,
    });

    Ok(next.run(request).await)
}

pub fn verify_token(token: &str, secret: &str) -> std::result::Result<Claims, AuthError> {
    let mut validation = Validation::default();
    validation.validate_nbf = true;

    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => Ok(data.claims),
        Err(err) => Err(classify(&err, token, secret)),
    }
}

fn classify(err: &jsonwebtoken::errors::Error, token: &str, secret: &str) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired {
            expired_at: expiry_of(token, secret),
        },
        ErrorKind::ImmatureSignature => AuthError::NotActive,
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AuthError::Invalid,
        _ => AuthError::Unverifiable,
    }
}

// An expired token still carries a valid signature, so the claims can be
// re-read with expiry validation switched off to report when it lapsed.
fn expiry_of(token: &str, secret: &str) -> String {
    let mut validation = Validation::default();
    validation.validate_exp = false;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .ok()
    .and_then(|data| Utc.timestamp_opt(data.claims.exp as i64, 0).single())
    .map(|at| at.to_rfc3339())
    .unwrap_or_default()
}

// Extractor for getting the authenticated user from request extensions
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AppError::Auth(AuthError::NoToken))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "unit-test-secret";

    fn make_token(secret: &str, exp: i64, nbf: Option<i64>) -> String {
        let claims = Claims {
            sub: "AL001".to_string(),
            role: Role::Alumni,
            exp: exp as usize,
            nbf: nbf.map(|v| v as usize),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_decodes_identity_and_role() {
        let token = make_token(SECRET, Utc::now().timestamp() + 3600, None);
        let claims = verify_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, "AL001");
        assert_eq!(claims.role, Role::Alumni);
    }

    #[test]
    fn expired_token_reports_expiry_timestamp() {
        // two hours in the past clears the default leeway
        let exp = Utc::now().timestamp() - 7200;
        let token = make_token(SECRET, exp, None);
        match verify_token(&token, SECRET).unwrap_err() {
            AuthError::Expired { expired_at } => {
                let reported = chrono::DateTime::parse_from_rfc3339(&expired_at).unwrap();
                assert_eq!(reported.timestamp(), exp);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn wrong_secret_is_invalid_not_expired() {
        // expired AND mis-signed: the signature check must win
        let token = make_token("some-other-secret", Utc::now().timestamp() - 7200, None);
        assert!(matches!(
            verify_token(&token, SECRET).unwrap_err(),
            AuthError::Invalid
        ));
    }

    #[test]
    fn malformed_token_is_invalid() {
        assert!(matches!(
            verify_token("not-a-token", SECRET).unwrap_err(),
            AuthError::Invalid
        ));
    }

    #[test]
    fn future_nbf_is_not_active() {
        let now = Utc::now().timestamp();
        let token = make_token(SECRET, now + 7200, Some(now + 3600));
        assert!(matches!(
            verify_token(&token, SECRET).unwrap_err(),
            AuthError::NotActive
        ));
    }

    #[test]
    fn error_codes_are_distinct() {
        assert_eq!(
            AuthError::Expired {
                expired_at: String::new()
            }
            .code(),
            "TOKEN_EXPIRED"
        );
        assert_eq!(AuthError::Invalid.code(), "INVALID_TOKEN");
        assert_eq!(AuthError::NoToken.code(), "NO_TOKEN");
        assert_eq!(AuthError::NotActive.code(), "TOKEN_NOT_ACTIVE");
        assert_eq!(AuthError::Unverifiable.code(), "TOKEN_INVALID");
    }
}

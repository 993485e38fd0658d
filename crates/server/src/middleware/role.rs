use axum::{extract::Request, middleware::Next, response::Response};

use crate::{
    db::models::Role,
    error::{AppError, AuthError, Result},
    middleware::auth::AuthUser,
};

// Route -> allowed-role policy. Routers attach these gates with
// `route_layer` instead of re-checking `user.role` inside each handler.
pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
pub const STUDENT_ONLY: &[Role] = &[Role::Student];
pub const ALUMNI_ONLY: &[Role] = &[Role::Alumni];

pub async fn admin_only(request: Request, next: Next) -> Result<Response> {
    gate(ADMIN_ONLY, request, next).await
}

pub async fn student_only(request: Request, next: Next) -> Result<Response> {
    gate(STUDENT_ONLY, request, next).await
}

pub async fn alumni_only(request: Request, next: Next) -> Result<Response> {
    gate(ALUMNI_ONLY, request, next).await
}

async fn gate(allowed: &'static [Role], request: Request, next: Next) -> Result<Response> {
    // the auth middleware runs outside this gate and attaches the identity
    let role = request
        .extensions()
        .get::<AuthUser>()
        .map(|user| user.role)
        .ok_or(AuthError::NoToken)?;

    if !allowed.contains(&role) {
        let expected = allowed
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join(" or ");
        return Err(AppError::Forbidden(format!(
            "Access denied: requires {expected} role"
        )));
    }

    Ok(next.run(request).await)
}

use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::{
    db::models::User,
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_profile).put(update_profile))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub college_name: Option<String>,
    pub graduation_year: Option<i64>,
    pub current_company: Option<String>,
    pub designation: Option<String>,
    pub bio: Option<String>,
}

async fn get_profile(State(state): State<AppState>, user: AuthUser) -> Result<Json<User>> {
    let row = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = ?")
        .bind(&user.id)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(row))
}

async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<User>> {
    if let Some(name) = &body.name {
        if name.trim().is_empty() {
            return Err(AppError::Validation("Name cannot be empty".to_string()));
        }
    }

    sqlx::query(
        "UPDATE users SET name = COALESCE(?, name), phone = COALESCE(?, phone), \
         department = COALESCE(?, department), college_name = COALESCE(?, college_name), \
         graduation_year = COALESCE(?, graduation_year), \
         current_company = COALESCE(?, current_company), \
         designation = COALESCE(?, designation), bio = COALESCE(?, bio) \
         WHERE user_id = ?",
    )
    .bind(&body.name)
    .bind(&body.phone)
    .bind(&body.department)
    .bind(&body.college_name)
    .bind(body.graduation_year)
    .bind(&body.current_company)
    .bind(&body.designation)
    .bind(&body.bio)
    .bind(&user.id)
    .execute(&state.db.pool)
    .await?;

    let row = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = ?")
        .bind(&user.id)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(row))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::test_util::{seed_user, send_json, test_state, token_for};

    #[tokio::test]
    async fn profile_update_is_partial() {
        let state = test_state().await;
        seed_user(&state, "AL001", "riya@example.edu", "sup3r-secret", "alumni").await;
        let token = token_for(&state, "AL001", "alumni");

        let (status, body) = send_json(
            &state,
            Method::PUT,
            "/api/profile",
            Some(&token),
            Some(json!({
                "current_company": "Initech",
                "designation": "Senior Engineer"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Test User");
        assert_eq!(body["current_company"], "Initech");
        assert_eq!(body["designation"], "Senior Engineer");

        let (status, body) =
            send_json(&state, Method::GET, "/api/profile", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current_company"], "Initech");
        assert!(body.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let state = test_state().await;
        seed_user(&state, "AL001", "riya@example.edu", "sup3r-secret", "alumni").await;
        let token = token_for(&state, "AL001", "alumni");

        let (status, _) = send_json(
            &state,
            Method::PUT,
            "/api/profile",
            Some(&token),
            Some(json!({ "name": "  " })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

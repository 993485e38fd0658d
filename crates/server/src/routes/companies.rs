use axum::{
    extract::{Path, State},
    middleware as axum_middleware,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    db::models::Company,
    error::{AppError, Result},
    middleware::{auth::AuthUser, role},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_company))
        .route("/:id", put(update_company).delete(delete_company))
        .route_layer(axum_middleware::from_fn(role::admin_only))
        .route("/", get(list_companies))
        .route("/:id", get(get_company))
}

#[derive(Debug, Deserialize)]
pub struct CreateCompanyRequest {
    pub name: String,
    pub website: String,
    pub location: String,
    pub description: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCompanyRequest {
    pub name: Option<String>,
    pub website: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub logo_url: Option<String>,
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| AppError::Validation("Invalid company id".to_string()))
}

async fn list_companies(State(state): State<AppState>) -> Result<Json<Vec<Company>>> {
    let companies =
        sqlx::query_as::<_, Company>("SELECT * FROM companies ORDER BY created_at DESC")
            .fetch_all(&state.db.pool)
            .await?;

    Ok(Json(companies))
}

async fn get_company(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Company>> {
    let company_id = parse_id(&id)?;

    let company = sqlx::query_as::<_, Company>("SELECT * FROM companies WHERE company_id = ?")
        .bind(company_id)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Company not found".to_string()))?;

    Ok(Json(company))
}

async fn create_company(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateCompanyRequest>,
) -> Result<Json<Company>> {
    if body.name.trim().is_empty() {
        return Err(AppError::Validation("Company name is required".to_string()));
    }
    if body.website.trim().is_empty() || body.location.trim().is_empty() {
        return Err(AppError::Validation(
            "Website and location are required".to_string(),
        ));
    }

    let now = Utc::now().to_rfc3339();
    let inserted = sqlx::query(
        "INSERT INTO companies (name, website, location, description, logo_url, created_by, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&body.name)
    .bind(&body.website)
    .bind(&body.location)
    .bind(&body.description)
    .bind(&body.logo_url)
    .bind(&user.id)
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    Ok(Json(Company {
        company_id: inserted.last_insert_rowid(),
        name: body.name,
        website: body.website,
        location: body.location,
        description: body.description,
        logo_url: body.logo_url,
        created_by: user.id,
        created_at: now,
    }))
}

async fn update_company(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateCompanyRequest>,
) -> Result<Json<Company>> {
    let company_id = parse_id(&id)?;

    let exists =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM companies WHERE company_id = ?")
            .bind(company_id)
            .fetch_one(&state.db.pool)
            .await?;
    if exists == 0 {
        return Err(AppError::NotFound("Company not found".to_string()));
    }

    sqlx::query(
        "UPDATE companies SET name = COALESCE(?, name), website = COALESCE(?, website), \
         location = COALESCE(?, location), description = COALESCE(?, description), \
         logo_url = COALESCE(?, logo_url) WHERE company_id = ?",
    )
    .bind(&body.name)
    .bind(&body.website)
    .bind(&body.location)
    .bind(&body.description)
    .bind(&body.logo_url)
    .bind(company_id)
    .execute(&state.db.pool)
    .await?;

    let company = sqlx::query_as::<_, Company>("SELECT * FROM companies WHERE company_id = ?")
        .bind(company_id)
        .fetch_one(&state.db.pool)
        .await?;

    Ok(Json(company))
}

async fn delete_company(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let company_id = parse_id(&id)?;

    let exists =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM companies WHERE company_id = ?")
            .bind(company_id)
            .fetch_one(&state.db.pool)
            .await?;
    if exists == 0 {
        return Err(AppError::NotFound("Company not found".to_string()));
    }

    // reviews and their rounds go with the company
    sqlx::query("DELETE FROM companies WHERE company_id = ?")
        .bind(company_id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(json!({ "success": true, "message": "Company deleted" })))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::test_util::{seed_company, seed_user, send_json, test_state, token_for};

    #[tokio::test]
    async fn admin_creates_and_lists_companies() {
        let state = test_state().await;
        seed_user(&state, "AD001", "admin@example.edu", "sup3r-secret", "admin").await;
        let token = token_for(&state, "AD001", "admin");

        let (status, body) = send_json(
            &state,
            Method::POST,
            "/api/companies",
            Some(&token),
            Some(json!({
                "name": "Initech",
                "website": "https://initech.example",
                "location": "Bengaluru"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["company_id"].as_i64().is_some());

        let (status, body) =
            send_json(&state, Method::GET, "/api/companies", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn non_admins_cannot_create_companies() {
        let state = test_state().await;
        seed_user(&state, "ST001", "dev@example.edu", "sup3r-secret", "student").await;
        let token = token_for(&state, "ST001", "student");

        let (status, body) = send_json(
            &state,
            Method::POST,
            "/api/companies",
            Some(&token),
            Some(json!({
                "name": "Initech",
                "website": "https://initech.example",
                "location": "Bengaluru"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("requires admin role"));
    }

    #[tokio::test]
    async fn update_patches_only_provided_fields() {
        let state = test_state().await;
        seed_user(&state, "AD001", "admin@example.edu", "sup3r-secret", "admin").await;
        let company_id = seed_company(&state, "Initech").await;
        let token = token_for(&state, "AD001", "admin");

        let (status, body) = send_json(
            &state,
            Method::PUT,
            &format!("/api/companies/{company_id}"),
            Some(&token),
            Some(json!({ "location": "Pune" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Initech");
        assert_eq!(body["location"], "Pune");
    }

    #[tokio::test]
    async fn non_numeric_id_is_a_validation_error() {
        let state = test_state().await;
        seed_user(&state, "AD001", "admin@example.edu", "sup3r-secret", "admin").await;
        let token = token_for(&state, "AD001", "admin");

        let (status, body) = send_json(
            &state,
            Method::GET,
            "/api/companies/initech",
            Some(&token),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid company id");
    }

    #[tokio::test]
    async fn deleting_a_company_removes_its_reviews_and_rounds() {
        let state = test_state().await;
        seed_user(&state, "AD001", "admin@example.edu", "sup3r-secret", "admin").await;
        seed_user(&state, "AL001", "riya@example.edu", "sup3r-secret", "alumni").await;
        let company_id = seed_company(&state, "Initech").await;

        let alumni_token = token_for(&state, "AL001", "alumni");
        let (status, _) = send_json(
            &state,
            Method::POST,
            &format!("/api/reviews/{company_id}/complete"),
            Some(&alumni_token),
            Some(json!({
                "job_role": "SDE",
                "placement_type": "on-campus",
                "offer_status": "offer",
                "rounds": [{ "round_type": "technical", "description": "DSA round" }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let admin_token = token_for(&state, "AD001", "admin");
        let (status, _) = send_json(
            &state,
            Method::DELETE,
            &format!("/api/companies/{company_id}"),
            Some(&admin_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let reviews: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews")
            .fetch_one(&state.db.pool)
            .await
            .unwrap();
        let rounds: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM review_rounds")
            .fetch_one(&state.db.pool)
            .await
            .unwrap();
        assert_eq!(reviews, 0);
        assert_eq!(rounds, 0);
    }
}

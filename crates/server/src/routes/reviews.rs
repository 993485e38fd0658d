use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    db::models::{Review, ReviewRound},
    error::{AppError, Result},
    middleware::{self, auth::AuthUser, role},
    AppState,
};

const PLACEMENT_TYPES: &[&str] = &["on-campus", "off-campus"];
const OFFER_STATUSES: &[&str] = &["offer", "no-offer"];
const ROUND_TYPES: &[&str] = &["aptitude", "technical", "hr", "other"];

pub fn router(state: AppState) -> Router<AppState> {
    // auth runs outside the role gate: route_layer applies last-added first
    Router::new()
        .route("/:id/complete", post(submit_review))
        .route("/:id/rounds", post(add_round))
        .route_layer(axum_middleware::from_fn(role::alumni_only))
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::auth::auth_middleware,
        ))
        .route("/:id", get(list_company_reviews))
        .route("/:id/rounds", get(list_review_rounds))
}

#[derive(Debug, Deserialize)]
pub struct SubmitReviewRequest {
    pub job_role: Option<String>,
    pub placement_type: Option<String>,
    pub offer_status: Option<String>,
    pub rounds: Option<Vec<RoundInput>>,
}

#[derive(Debug, Deserialize)]
pub struct RoundInput {
    pub round_type: Option<String>,
    pub description: Option<String>,
    pub tips: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitReviewResponse {
    pub review: Review,
    pub rounds: Vec<ReviewRound>,
}

struct ValidRound {
    round_type: String,
    description: String,
    tips: Option<String>,
}

fn parse_id(raw: &str, what: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| AppError::Validation(format!("Invalid {what} id")))
}

// All validation happens before the transaction opens; the cheap checks
// never cost a pool connection.
fn validate_submission(body: SubmitReviewRequest) -> Result<(String, String, String, Vec<ValidRound>)> {
    let job_role = body.job_role.unwrap_or_default();
    let placement_type = body.placement_type.unwrap_or_default();
    let offer_status = body.offer_status.unwrap_or_default();

    if job_role.trim().is_empty() || placement_type.is_empty() || offer_status.is_empty() {
        return Err(AppError::Validation("All fields are required".to_string()));
    }

    if !PLACEMENT_TYPES.contains(&placement_type.as_str())
        || !OFFER_STATUSES.contains(&offer_status.as_str())
    {
        return Err(AppError::Validation(
            "Invalid placement type or offer status".to_string(),
        ));
    }

    let rounds = body.rounds.unwrap_or_default();
    if rounds.is_empty() {
        return Err(AppError::Validation(
            "At least one round is required".to_string(),
        ));
    }

    let mut valid = Vec::with_capacity(rounds.len());
    for round in rounds {
        let round_type = round.round_type.unwrap_or_default();
        if !ROUND_TYPES.contains(&round_type.as_str()) {
            return Err(AppError::Validation(format!(
                "Invalid round type '{round_type}'"
            )));
        }
        let description = round.description.unwrap_or_default();
        if description.trim().is_empty() {
            return Err(AppError::Validation(
                "Each round needs a description".to_string(),
            ));
        }
        valid.push(ValidRound {
            round_type,
            description,
            tips: round.tips,
        });
    }

    Ok((job_role, placement_type, offer_status, valid))
}

async fn submit_review(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<SubmitReviewRequest>,
) -> Result<(StatusCode, Json<SubmitReviewResponse>)> {
    let company_id = parse_id(&id, "company")?;
    let (job_role, placement_type, offer_status, rounds) = validate_submission(body)?;

    let exists =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM companies WHERE company_id = ?")
            .bind(company_id)
            .fetch_one(&state.db.pool)
            .await?;
    if exists == 0 {
        return Err(AppError::NotFound("Company not found".to_string()));
    }

    let now = Utc::now().to_rfc3339();

    // One review plus all its rounds land atomically; the transaction rolls
    // back on drop if any insert fails.
    let mut tx = state.db.pool.begin().await?;

    let inserted = sqlx::query(
        "INSERT INTO reviews (company_id, alumni_id, job_role, placement_type, offer_status, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(company_id)
    .bind(&user.id)
    .bind(&job_role)
    .bind(&placement_type)
    .bind(&offer_status)
    .bind(&now)
    .execute(&mut *tx)
    .await?;
    let review_id = inserted.last_insert_rowid();

    let mut created_rounds = Vec::with_capacity(rounds.len());
    for round in &rounds {
        let inserted = sqlx::query(
            "INSERT INTO review_rounds (review_id, round_type, description, tips) VALUES (?, ?, ?, ?)",
        )
        .bind(review_id)
        .bind(&round.round_type)
        .bind(&round.description)
        .bind(&round.tips)
        .execute(&mut *tx)
        .await?;

        created_rounds.push(ReviewRound {
            round_id: inserted.last_insert_rowid(),
            review_id,
            round_type: round.round_type.clone(),
            description: round.description.clone(),
            tips: round.tips.clone(),
        });
    }

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitReviewResponse {
            review: Review {
                review_id,
                company_id,
                alumni_id: user.id,
                job_role,
                placement_type,
                offer_status,
                created_at: now,
            },
            rounds: created_rounds,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct AddRoundRequest {
    pub round_type: Option<String>,
    pub description: Option<String>,
    pub tips: Option<String>,
}

async fn add_round(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<AddRoundRequest>,
) -> Result<Json<Value>> {
    let review_id = parse_id(&id, "review")?;

    let round_type = body.round_type.unwrap_or_default();
    if !ROUND_TYPES.contains(&round_type.as_str()) {
        return Err(AppError::Validation(format!(
            "Invalid round type '{round_type}'"
        )));
    }
    let description = body.description.unwrap_or_default();
    if description.trim().is_empty() {
        return Err(AppError::Validation(
            "Each round needs a description".to_string(),
        ));
    }

    let owner =
        sqlx::query_scalar::<_, String>("SELECT alumni_id FROM reviews WHERE review_id = ?")
            .bind(review_id)
            .fetch_optional(&state.db.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Review not found".to_string()))?;

    if owner != user.id {
        return Err(AppError::Forbidden(
            "You can only add rounds to your own reviews".to_string(),
        ));
    }

    let inserted = sqlx::query(
        "INSERT INTO review_rounds (review_id, round_type, description, tips) VALUES (?, ?, ?, ?)",
    )
    .bind(review_id)
    .bind(&round_type)
    .bind(&description)
    .bind(&body.tips)
    .execute(&state.db.pool)
    .await?;

    let round = ReviewRound {
        round_id: inserted.last_insert_rowid(),
        review_id,
        round_type,
        description,
        tips: body.tips,
    };

    Ok(Json(json!({ "success": true, "round": round })))
}

async fn list_company_reviews(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Review>>> {
    let company_id = parse_id(&id, "company")?;

    let reviews = sqlx::query_as::<_, Review>(
        "SELECT * FROM reviews WHERE company_id = ? ORDER BY created_at DESC",
    )
    .bind(company_id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(reviews))
}

async fn list_review_rounds(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ReviewRound>>> {
    let review_id = parse_id(&id, "review")?;

    // ascending round_id matches insertion order
    let rounds = sqlx::query_as::<_, ReviewRound>(
        "SELECT * FROM review_rounds WHERE review_id = ? ORDER BY round_id ASC",
    )
    .bind(review_id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(rounds))
}

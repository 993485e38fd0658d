use axum::{
    extract::{Path, Query, State},
    middleware as axum_middleware,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::{AppError, Result},
    middleware::{auth::AuthUser, role},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_question))
        .route("/:id", put(update_question).delete(delete_question))
        .route_layer(axum_middleware::from_fn(role::student_only))
        .merge(
            Router::new()
                .route("/:id/answers", post(create_answer))
                .route("/answers/:id", put(update_answer).delete(delete_answer))
                .route_layer(axum_middleware::from_fn(role::alumni_only)),
        )
        .route("/", get(list_questions))
        .route("/:id", get(get_question))
        .route("/:id/answers", get(list_answers))
}

#[derive(Debug, Deserialize)]
pub struct ListQuestionsQuery {
    pub company_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionBody {
    pub content: String,
    pub company_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AnswerBody {
    pub content: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct QuestionResponse {
    pub question_id: i64,
    pub content: String,
    pub student_id: String,
    pub student_name: String,
    pub company_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AnswerResponse {
    pub answer_id: i64,
    pub question_id: i64,
    pub content: String,
    pub alumni_id: String,
    pub alumni_name: String,
    pub created_at: String,
    pub updated_at: String,
}

const QUESTION_SELECT: &str = "SELECT q.question_id, q.content, q.student_id, u.name AS student_name, \
     q.company_id, q.created_at, q.updated_at \
     FROM questions q JOIN users u ON q.student_id = u.user_id";

const ANSWER_SELECT: &str = "SELECT a.answer_id, a.question_id, a.content, a.alumni_id, u.name AS alumni_name, \
     a.created_at, a.updated_at \
     FROM answers a JOIN users u ON a.alumni_id = u.user_id";

fn parse_id(raw: &str, what: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| AppError::Validation(format!("Invalid {what} id")))
}

async fn list_questions(
    State(state): State<AppState>,
    Query(query): Query<ListQuestionsQuery>,
) -> Result<Json<Vec<QuestionResponse>>> {
    let questions = match query.company_id {
        Some(company_id) => {
            sqlx::query_as::<_, QuestionResponse>(&format!(
                "{QUESTION_SELECT} WHERE q.company_id = ? ORDER BY q.created_at DESC"
            ))
            .bind(company_id)
            .fetch_all(&state.db.pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, QuestionResponse>(&format!(
                "{QUESTION_SELECT} ORDER BY q.created_at DESC"
            ))
            .fetch_all(&state.db.pool)
            .await?
        }
    };

    Ok(Json(questions))
}

async fn get_question(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let question_id = parse_id(&id, "question")?;

    let question = sqlx::query_as::<_, QuestionResponse>(&format!(
        "{QUESTION_SELECT} WHERE q.question_id = ?"
    ))
    .bind(question_id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

    let answers = sqlx::query_as::<_, AnswerResponse>(&format!(
        "{ANSWER_SELECT} WHERE a.question_id = ? ORDER BY a.created_at ASC"
    ))
    .bind(question_id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(json!({ "question": question, "answers": answers })))
}

async fn create_question(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<QuestionBody>,
) -> Result<Json<Value>> {
    if body.content.trim().is_empty() {
        return Err(AppError::Validation(
            "Question content is required".to_string(),
        ));
    }

    if let Some(company_id) = body.company_id {
        let exists =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM companies WHERE company_id = ?")
                .bind(company_id)
                .fetch_one(&state.db.pool)
                .await?;
        if exists == 0 {
            return Err(AppError::NotFound("Company not found".to_string()));
        }
    }

    let now = Utc::now().to_rfc3339();
    let inserted = sqlx::query(
        "INSERT INTO questions (content, student_id, company_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&body.content)
    .bind(&user.id)
    .bind(body.company_id)
    .bind(&now)
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "question_id": inserted.last_insert_rowid(),
    })))
}

// Ownership lives with the author; role gates alone cannot express it.
async fn check_question_owner(state: &AppState, question_id: i64, user_id: &str) -> Result<()> {
    let owner =
        sqlx::query_scalar::<_, String>("SELECT student_id FROM questions WHERE question_id = ?")
            .bind(question_id)
            .fetch_optional(&state.db.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Question not found".to_string()))?;

    if owner != user_id {
        return Err(AppError::Forbidden(
            "You can only modify your own questions".to_string(),
        ));
    }
    Ok(())
}

async fn check_answer_owner(state: &AppState, answer_id: i64, user_id: &str) -> Result<()> {
    let owner =
        sqlx::query_scalar::<_, String>("SELECT alumni_id FROM answers WHERE answer_id = ?")
            .bind(answer_id)
            .fetch_optional(&state.db.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Answer not found".to_string()))?;

    if owner != user_id {
        return Err(AppError::Forbidden(
            "You can only modify your own answers".to_string(),
        ));
    }
    Ok(())
}

async fn update_question(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<QuestionBody>,
) -> Result<Json<Value>> {
    let question_id = parse_id(&id, "question")?;
    check_question_owner(&state, question_id, &user.id).await?;

    if body.content.trim().is_empty() {
        return Err(AppError::Validation(
            "Question content is required".to_string(),
        ));
    }

    sqlx::query("UPDATE questions SET content = ?, updated_at = ? WHERE question_id = ?")
        .bind(&body.content)
        .bind(Utc::now().to_rfc3339())
        .bind(question_id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(json!({ "success": true })))
}

async fn delete_question(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let question_id = parse_id(&id, "question")?;
    check_question_owner(&state, question_id, &user.id).await?;

    sqlx::query("DELETE FROM questions WHERE question_id = ?")
        .bind(question_id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(json!({ "success": true, "message": "Question deleted" })))
}

async fn list_answers(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AnswerResponse>>> {
    let question_id = parse_id(&id, "question")?;

    let answers = sqlx::query_as::<_, AnswerResponse>(&format!(
        "{ANSWER_SELECT} WHERE a.question_id = ? ORDER BY a.created_at ASC"
    ))
    .bind(question_id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(answers))
}

async fn create_answer(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<AnswerBody>,
) -> Result<Json<Value>> {
    let question_id = parse_id(&id, "question")?;

    if body.content.trim().is_empty() {
        return Err(AppError::Validation(
            "Answer content is required".to_string(),
        ));
    }

    let exists =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM questions WHERE question_id = ?")
            .bind(question_id)
            .fetch_one(&state.db.pool)
            .await?;
    if exists == 0 {
        return Err(AppError::NotFound("Question not found".to_string()));
    }

    let now = Utc::now().to_rfc3339();
    let inserted = sqlx::query(
        "INSERT INTO answers (question_id, content, alumni_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(question_id)
    .bind(&body.content)
    .bind(&user.id)
    .bind(&now)
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "answer_id": inserted.last_insert_rowid(),
    })))
}

async fn update_answer(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<AnswerBody>,
) -> Result<Json<Value>> {
    let answer_id = parse_id(&id, "answer")?;
    check_answer_owner(&state, answer_id, &user.id).await?;

    if body.content.trim().is_empty() {
        return Err(AppError::Validation(
            "Answer content is required".to_string(),
        ));
    }

    sqlx::query("UPDATE answers SET content = ?, updated_at = ? WHERE answer_id = ?")
        .bind(&body.content)
        .bind(Utc::now().to_rfc3339())
        .bind(answer_id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(json!({ "success": true })))
}

async fn delete_answer(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let answer_id = parse_id(&id, "answer")?;
    check_answer_owner(&state, answer_id, &user.id).await?;

    sqlx::query("DELETE FROM answers WHERE answer_id = ?")
        .bind(answer_id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(json!({ "success": true, "message": "Answer deleted" })))
}

use std::path::{Path as FsPath, PathBuf};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    middleware as axum_middleware,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    db::models::{Role, User},
    error::{AppError, Result},
    middleware::role,
    routes::auth::{hash_password, UserResponse},
    services::provisioning::{self, ProvisionReport},
    AppState,
};

const CSV_TEMPLATE: &str = "user_id,email,name,role,department\n\
    ST2024001,student@example.edu,Student Name,student,CSE\n";

// generated files linger long enough to be downloaded, then get swept
const CLEANUP_DELAY: Duration = Duration::from_secs(300);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/:user_id/reset-password", post(reset_user_password))
        .route("/generate-passwords", post(generate_passwords))
        .route("/download-template", get(download_template))
        .route("/download-generated/:filename", get(download_generated))
        .route_layer(axum_middleware::from_fn(role::admin_only))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub user_id: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub name: String,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub college_name: Option<String>,
    pub graduation_year: Option<i64>,
    pub current_company: Option<String>,
    pub designation: Option<String>,
    pub bio: Option<String>,
}

async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserRequest>,
) -> Result<Json<Value>> {
    if body.user_id.trim().is_empty() || body.name.trim().is_empty() {
        return Err(AppError::Validation(
            "User id and name are required".to_string(),
        ));
    }
    if body.email.is_empty() || !body.email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if body.password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    let role = Role::parse(&body.role)
        .ok_or_else(|| AppError::Validation("Role must be admin, student, or alumni".to_string()))?;

    let email = body.email.trim().to_lowercase();
    let user_id = body.user_id.trim().to_string();

    let existing =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE user_id = ? OR email = ?")
            .bind(&user_id)
            .bind(&email)
            .fetch_one(&state.db.pool)
            .await?;
    if existing > 0 {
        return Err(AppError::Validation(
            "A user with this id or email already exists".to_string(),
        ));
    }

    let password_hash = hash_password(&body.password)?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO users (user_id, email, password_hash, role, name, phone, department, \
         college_name, graduation_year, current_company, designation, bio, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&user_id)
    .bind(&email)
    .bind(&password_hash)
    .bind(role)
    .bind(body.name.trim())
    .bind(&body.phone)
    .bind(&body.department)
    .bind(&body.college_name)
    .bind(body.graduation_year)
    .bind(&body.current_company)
    .bind(&body.designation)
    .bind(&body.bio)
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    let user = UserResponse {
        user_id,
        email,
        name: body.name.trim().to_string(),
        role,
    };

    Ok(Json(json!({ "success": true, "user": user })))
}

fn temp_password() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_string()
}

async fn reset_user_password(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = ?")
        .bind(&user_id)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let password = temp_password();
    let password_hash = hash_password(&password)?;

    sqlx::query("UPDATE users SET password_hash = ? WHERE user_id = ?")
        .bind(&password_hash)
        .bind(&user.user_id)
        .execute(&state.db.pool)
        .await?;

    // the reset sticks even when the notification cannot be delivered
    let body = format!(
        "Hello {},\n\nYour placement portal password was reset by an administrator.\n\n\
         Temporary password: {password}\n\n\
         Please sign in and change it right away.\n",
        user.name
    );
    let email_sent = match state
        .mailer
        .send(&user.email, "Your password was reset", &body)
        .await
    {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("password reset mail to {} failed: {e}", user.email);
            false
        }
    };

    Ok(Json(json!({
        "success": true,
        "message": "Password reset",
        "emailSent": email_sent,
    })))
}

async fn generate_passwords(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ProvisionReport>> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid upload: {e}")))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("users.csv").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("Invalid upload: {e}")))?;
            upload = Some((filename, data.to_vec()));
        }
    }

    let (filename, data) =
        upload.ok_or_else(|| AppError::Validation("No file uploaded".to_string()))?;

    tokio::fs::create_dir_all(&state.config.upload_dir)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create upload directory: {e}")))?;

    // strip any path the client sent along, keep only the leaf name
    let safe_name = FsPath::new(&filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("users.csv");
    let stamped = format!("{}_{safe_name}", Utc::now().format("%Y%m%d_%H%M%S"));
    let input_path = PathBuf::from(&state.config.upload_dir).join(stamped);

    tokio::fs::write(&input_path, &data)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to save upload: {e}")))?;

    tracing::info!("provisioning batch from {}", input_path.display());

    let report = provisioning::run(
        &state.db,
        &state.config,
        state.mailer.as_ref(),
        &input_path,
    )
    .await;

    // the uploaded file has served its purpose either way
    let _ = tokio::fs::remove_file(&input_path).await;

    report.map(Json)
}

async fn download_template() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv")
        .header(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"user_template.csv\"",
        )
        .body(Body::from(CSV_TEMPLATE))
        .unwrap()
}

async fn download_generated(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response> {
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(AppError::Validation("Invalid filename".to_string()));
    }

    let path = PathBuf::from(&state.config.upload_dir).join(&filename);
    if !path.exists() {
        return Err(AppError::NotFound("File not found".to_string()));
    }

    let data = tokio::fs::read(&path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to read file: {e}")))?;

    // best-effort sweep once the caller has had a chance to download
    tokio::spawn(async move {
        tokio::time::sleep(CLEANUP_DELAY).await;
        let _ = tokio::fs::remove_file(&path).await;
    });

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))?;

    Ok(response)
}

//! Shared helpers for the in-crate tests: an in-memory database with the
//! real migrations applied, a recording mail transport, and a oneshot
//! driver for the assembled router.

use std::sync::{Arc, Mutex};

use axum::{
    async_trait,
    body::Body,
    http::{Method, Request, StatusCode},
};
use chrono::Utc;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use tower::util::ServiceExt;

use crate::{
    config::Config,
    db::{models::Role, Database},
    error::{AppError, Result},
    middleware::auth::Claims,
    services::mailer::Mailer,
    AppState,
};

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, _subject: &str, body: &str) -> Result<()> {
        if self.fail {
            return Err(AppError::Internal("mail relay unavailable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

fn test_config() -> Config {
    Config {
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        upload_dir: std::env::temp_dir()
            .join("placementhub-test-uploads")
            .to_string_lossy()
            .into_owned(),
        jwt_secret: "test-secret".to_string(),
        passgen_command: "true".to_string(),
        smtp_host: "localhost".to_string(),
        smtp_username: None,
        smtp_password: None,
        mail_from: "Placement Cell <noreply@example.edu>".to_string(),
        email_delay_ms: 0,
    }
}

pub async fn test_state() -> AppState {
    test_state_with_mail().await.0
}

pub async fn test_state_with_mail() -> (AppState, Arc<RecordingMailer>) {
    // a single connection keeps every query on the same in-memory database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let db = Database { pool };
    db.run_migrations().await.unwrap();

    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState {
        db,
        config: test_config(),
        mailer: mailer.clone(),
    };
    (state, mailer)
}

pub async fn seed_user(state: &AppState, user_id: &str, email: &str, password: &str, role: &str) {
    let password_hash = crate::routes::auth::hash_password(password).unwrap();
    sqlx::query(
        "INSERT INTO users (user_id, email, password_hash, role, name, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(email)
    .bind(&password_hash)
    .bind(role)
    .bind("Test User")
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db.pool)
    .await
    .unwrap();
}

pub async fn seed_company(state: &AppState, name: &str) -> i64 {
    // companies need a creator on record
    sqlx::query(
        "INSERT OR IGNORE INTO users (user_id, email, password_hash, role, name, created_at) \
         VALUES ('SEED', 'seed@example.edu', 'unused', 'admin', 'Seeder', ?)",
    )
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db.pool)
    .await
    .unwrap();

    let inserted = sqlx::query(
        "INSERT INTO companies (name, website, location, created_by, created_at) \
         VALUES (?, 'https://example.com', 'Bengaluru', 'SEED', ?)",
    )
    .bind(name)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db.pool)
    .await
    .unwrap();

    inserted.last_insert_rowid()
}

pub fn token_for(state: &AppState, user_id: &str, role: &str) -> String {
    signed_token(&state.config.jwt_secret, user_id, role, Utc::now().timestamp() + 3600)
}

pub fn signed_token(secret: &str, user_id: &str, role: &str, exp: i64) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        role: Role::parse(role).unwrap(),
        exp: exp as usize,
        nbf: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

pub async fn send_json(
    state: &AppState,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }

    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = crate::app(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, value)
}

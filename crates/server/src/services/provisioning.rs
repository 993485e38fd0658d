use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::{
    config::Config,
    db::{models::Role, Database},
    error::{AppError, Result},
    services::mailer::Mailer,
};

pub const SCRIPT_TIMEOUT: Duration = Duration::from_secs(60);
pub const MAX_SCRIPT_OUTPUT: usize = 1024 * 1024;
const MAX_ERROR_SAMPLE: usize = 5;

/// One row of the password generator's result file.
#[derive(Debug, Deserialize)]
pub struct GeneratedRow {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub role: Option<String>,
    pub department: Option<String>,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionReport {
    pub success: bool,
    pub total_processed: usize,
    #[serde(rename = "insertedInDB")]
    pub inserted_in_db: usize,
    #[serde(rename = "updatedInDB")]
    pub updated_in_db: usize,
    #[serde(rename = "dbFailed")]
    pub db_failed: usize,
    pub emails_sent: usize,
    pub emails_failed: usize,
    pub errors: Vec<RowError>,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
pub struct RowError {
    pub row: usize,
    pub email: String,
    pub message: String,
}

enum Upsert {
    Inserted,
    Updated,
}

/// Runs the whole pipeline: external generator, result parse, per-row
/// upsert + notification. DB writes are not rolled back when later rows or
/// emails fail; everything is tallied and reported instead.
pub async fn run(
    db: &Database,
    config: &Config,
    mailer: &dyn Mailer,
    input_path: &Path,
) -> Result<ProvisionReport> {
    let output_path = generated_path(input_path);
    run_passgen(config, input_path, &output_path).await?;
    let rows = read_generated(&output_path)?;
    Ok(apply_rows(db, config, mailer, rows, &output_path).await)
}

pub fn generated_path(input_path: &Path) -> PathBuf {
    let stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("upload");
    input_path.with_file_name(format!("{stem}_generated.csv"))
}

async fn run_passgen(config: &Config, input: &Path, output: &Path) -> Result<()> {
    let child = Command::new(&config.passgen_command)
        .arg(input)
        .arg(output)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::Internal(format!("Failed to start password generator: {e}")))?;

    // dropping the future on timeout kills the child
    let result = tokio::time::timeout(SCRIPT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| AppError::Internal("Password generator timed out".to_string()))?
        .map_err(|e| AppError::Internal(format!("Password generator failed: {e}")))?;

    if result.stdout.len() + result.stderr.len() > MAX_SCRIPT_OUTPUT {
        return Err(AppError::Internal(
            "Password generator produced too much output".to_string(),
        ));
    }

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(AppError::Internal(format!(
            "Password generator exited with {}: {}",
            result.status,
            stderr.trim()
        )));
    }

    Ok(())
}

fn read_generated(path: &Path) -> Result<Vec<csv::Result<GeneratedRow>>> {
    let reader = csv::Reader::from_path(path)
        .map_err(|e| AppError::Internal(format!("Failed to read generated file: {e}")))?;
    Ok(reader.into_deserialize().collect())
}

async fn apply_rows(
    db: &Database,
    config: &Config,
    mailer: &dyn Mailer,
    rows: Vec<csv::Result<GeneratedRow>>,
    output_path: &Path,
) -> ProvisionReport {
    let download_name = output_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("generated.csv");

    let mut report = ProvisionReport {
        success: true,
        total_processed: 0,
        inserted_in_db: 0,
        updated_in_db: 0,
        db_failed: 0,
        emails_sent: 0,
        emails_failed: 0,
        errors: Vec::new(),
        download_url: format!("/api/admin/download-generated/{download_name}"),
    };

    for (index, parsed) in rows.into_iter().enumerate() {
        report.total_processed += 1;

        let row = match parsed {
            Ok(row) => row,
            Err(e) => {
                report.db_failed += 1;
                push_error(&mut report, index, "", format!("Malformed row: {e}"));
                continue;
            }
        };

        let email = row.email.trim().to_lowercase();
        if row.user_id.trim().is_empty() || email.is_empty() {
            report.db_failed += 1;
            push_error(
                &mut report,
                index,
                &email,
                "Missing user id or email".to_string(),
            );
            continue;
        }

        match upsert_user(db, &row, &email).await {
            Ok(Upsert::Inserted) => report.inserted_in_db += 1,
            Ok(Upsert::Updated) => report.updated_in_db += 1,
            Err(e) => {
                report.db_failed += 1;
                push_error(&mut report, index, &email, e.to_string());
                continue;
            }
        }

        match mailer
            .send(
                &email,
                "Your placement portal account",
                &credentials_body(&row, &email),
            )
            .await
        {
            Ok(()) => report.emails_sent += 1,
            Err(e) => {
                report.emails_failed += 1;
                push_error(&mut report, index, &email, e.to_string());
            }
        }

        // pace outbound mail so the relay does not throttle the batch
        tokio::time::sleep(Duration::from_millis(config.email_delay_ms)).await;
    }

    report
}

fn push_error(report: &mut ProvisionReport, index: usize, email: &str, message: String) {
    tracing::warn!("provisioning row {index}: {message}");
    if report.errors.len() < MAX_ERROR_SAMPLE {
        report.errors.push(RowError {
            // header line is row 1 in the source file
            row: index + 2,
            email: email.to_string(),
            message,
        });
    }
}

async fn upsert_user(db: &Database, row: &GeneratedRow, email: &str) -> Result<Upsert> {
    let password_hash = crate::routes::auth::hash_password(&row.password)?;
    let user_id = row.user_id.trim();

    let existing =
        sqlx::query_scalar::<_, String>("SELECT user_id FROM users WHERE user_id = ? OR email = ?")
            .bind(user_id)
            .bind(email)
            .fetch_optional(&db.pool)
            .await?;

    match existing {
        Some(found) => {
            sqlx::query(
                "UPDATE users SET email = ?, name = ?, password_hash = ?, \
                 department = COALESCE(?, department) WHERE user_id = ?",
            )
            .bind(email)
            .bind(row.name.trim())
            .bind(&password_hash)
            .bind(&row.department)
            .bind(&found)
            .execute(&db.pool)
            .await?;
            Ok(Upsert::Updated)
        }
        None => {
            let role = match &row.role {
                Some(value) => Role::parse(value.trim()).ok_or_else(|| {
                    AppError::Validation(format!("Invalid role '{}'", value.trim()))
                })?,
                None => Role::Student,
            };

            sqlx::query(
                "INSERT INTO users (user_id, email, password_hash, role, name, department, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(user_id)
            .bind(email)
            .bind(&password_hash)
            .bind(role)
            .bind(row.name.trim())
            .bind(&row.department)
            .bind(Utc::now().to_rfc3339())
            .execute(&db.pool)
            .await?;
            Ok(Upsert::Inserted)
        }
    }
}

fn credentials_body(row: &GeneratedRow, email: &str) -> String {
    format!(
        "Hello {},\n\nYour placement portal account is ready.\n\n\
         Login id: {}\nTemporary password: {}\n\n\
         Please sign in and change your password right away.\n",
        row.name.trim(),
        email,
        row.password
    )
}

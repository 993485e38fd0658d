use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Student,
    Alumni,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Student => "student",
            Role::Alumni => "alumni",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "admin" => Some(Role::Admin),
            "student" => Some(Role::Student),
            "alumni" => Some(Role::Alumni),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub user_id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub name: String,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub college_name: Option<String>,
    pub graduation_year: Option<i64>,
    pub current_company: Option<String>,
    pub designation: Option<String>,
    pub bio: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Company {
    pub company_id: i64,
    pub name: String,
    pub website: String,
    pub location: String,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Review {
    pub review_id: i64,
    pub company_id: i64,
    pub alumni_id: String,
    pub job_role: String,
    pub placement_type: String,
    pub offer_status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReviewRound {
    pub round_id: i64,
    pub review_id: i64,
    pub round_type: String,
    pub description: String,
    pub tips: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Question {
    pub question_id: i64,
    pub content: String,
    pub student_id: String,
    pub company_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Answer {
    pub answer_id: i64,
    pub question_id: i64,
    pub content: String,
    pub alumni_id: String,
    pub created_at: String,
    pub updated_at: String,
}

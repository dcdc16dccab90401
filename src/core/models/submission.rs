use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(sqlx::Type)]
#[sqlx(type_name = "submission_status", rename_all = "snake_case")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Draft,
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Submission {
    pub id: i32,
    pub code: Uuid,
    pub form_id: i32,
    pub user_id: Option<i32>,
    pub email: Option<String>,
    pub guest_name: Option<String>,
    pub status: SubmissionStatus,
    pub retention_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn is_draft(&self) -> bool {
        self.status == SubmissionStatus::Draft
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SubmissionField {
    pub id: i32,
    pub submission_id: i32,
    pub form_field_id: i32,
    pub answer: Option<Json<Value>>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionDetail {
    #[serde(flatten)]
    pub submission: Submission,
    pub fields: Vec<SubmissionField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerSubmit {
    pub form_field_id: i32,
    #[serde(default)]
    pub answer: Option<Value>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AnswersSave {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 255))]
    pub guest_name: Option<String>,
    #[serde(default)]
    pub answers: Vec<AnswerSubmit>,
    /// Completes the submission once the answers are stored.
    #[serde(default)]
    pub complete: bool,
}

#[derive(Debug, Clone)]
pub struct Insert {
    pub code: Uuid,
    pub form_id: i32,
    pub user_id: Option<i32>,
    pub status: SubmissionStatus,
    pub retention_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Update {
    pub email: Option<String>,
    pub guest_name: Option<String>,
    pub status: SubmissionStatus,
}

#[derive(Debug, Clone)]
pub struct FieldInsert {
    pub submission_id: i32,
    pub form_field_id: i32,
    pub answer: Option<Value>,
}

#[derive(Debug, Default)]
pub struct Query {
    pub form_id_eq: Option<i32>,
    pub user_id_eq: Option<i32>,
    pub exclude_drafts: bool,
}

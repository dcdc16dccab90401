use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(sqlx::Type)]
#[sqlx(type_name = "owner_kind", rename_all = "snake_case")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    User,
    Organisation,
}

/// Forms and templates belong either to a single user or to an organisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub kind: OwnerKind,
    pub id: i32,
}

impl Owner {
    pub fn user(id: i32) -> Self {
        Self { kind: OwnerKind::User, id }
    }

    pub fn organisation(id: i32) -> Self {
        Self {
            kind: OwnerKind::Organisation,
            id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormStatus {
    Draft,
    Scheduled,
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Form {
    pub id: i32,
    pub code: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub owner_kind: OwnerKind,
    pub owner_id: i32,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Form {
    pub fn owner(&self) -> Owner {
        Owner {
            kind: self.owner_kind,
            id: self.owner_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FormView {
    #[serde(flatten)]
    pub form: Form,
    pub status: FormStatus,
    pub submission_count: i64,
}

pub fn validate_hex_color(color: &str) -> Result<(), ValidationError> {
    let valid = color.len() == 7 && color.starts_with('#') && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(ValidationError::new("hex_color"));
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct Colors {
    #[validate(custom(function = "validate_hex_color"))]
    pub primary: Option<String>,
    #[validate(custom(function = "validate_hex_color"))]
    pub secondary: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FormCreate {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub organisation_id: Option<i32>,
    #[serde(default)]
    #[validate(nested)]
    pub colors: Colors,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FormUpdate {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub colors: Colors,
}

#[derive(Debug, Clone)]
pub struct Insert {
    pub code: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub owner: Owner,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Update {
    pub title: String,
    pub description: Option<String>,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
}

#[derive(Debug, Default)]
pub struct Query {
    pub owner_eq: Option<Owner>,
}

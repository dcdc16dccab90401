use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

#[derive(sqlx::Type)]
#[sqlx(type_name = "organisation_role", rename_all = "snake_case")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Editor,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }

    pub fn all() -> [Role; 4] {
        [Role::Owner, Role::Admin, Role::Editor, Role::Viewer]
    }
}

#[derive(sqlx::Type)]
#[sqlx(type_name = "member_status", rename_all = "snake_case")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Invited,
    Active,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Member {
    pub organisation_id: i32,
    pub user_id: i32,
    pub role: Role,
    /// When set, replaces the role's permission set entirely.
    pub permissions: Option<Vec<String>>,
    pub status: MemberStatus,
    pub invited_by: Option<i32>,
    pub invited_at: Option<DateTime<Utc>>,
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct MemberDetail {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub permissions: Option<Vec<String>>,
    pub status: MemberStatus,
    pub invited_at: Option<DateTime<Utc>>,
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MemberInvite {
    #[validate(email)]
    pub email: String,
    pub role: Role,
    pub permissions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RoleUpdate {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct PermissionsUpdate {
    pub permissions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct OwnershipTransfer {
    pub user_id: i32,
}

#[derive(Debug, Clone)]
pub struct Insert {
    pub organisation_id: i32,
    pub user_id: i32,
    pub role: Role,
    pub permissions: Option<Vec<String>>,
    pub status: MemberStatus,
    pub invited_by: Option<i32>,
}

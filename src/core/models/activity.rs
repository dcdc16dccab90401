use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;

pub const ORGANISATION_LOG: &str = "organisation";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Created,
    Updated,
    Moved,
    Deleted,
    MemberInvited,
    MemberJoined,
    MemberRemoved,
    MemberRoleUpdated,
    MemberPermissionsUpdated,
    OwnershipTransferred,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Created => "created",
            Event::Updated => "updated",
            Event::Moved => "moved",
            Event::Deleted => "deleted",
            Event::MemberInvited => "member_invited",
            Event::MemberJoined => "member_joined",
            Event::MemberRemoved => "member_removed",
            Event::MemberRoleUpdated => "member_role_updated",
            Event::MemberPermissionsUpdated => "member_permissions_updated",
            Event::OwnershipTransferred => "ownership_transferred",
        }
    }
}

/// A stored change to an organisation or its membership, newest first when listed.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Activity {
    pub id: i32,
    pub log_name: String,
    pub subject_type: String,
    pub subject_id: i32,
    pub event: String,
    pub causer_id: Option<i32>,
    pub properties: Json<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Insert {
    pub log_name: &'static str,
    pub subject_type: &'static str,
    pub subject_id: i32,
    pub event: Event,
    pub causer_id: Option<i32>,
    pub properties: Value,
}

#[derive(Debug, Default)]
pub struct Query {
    pub subject_type_eq: Option<&'static str>,
    pub subject_id_eq: Option<i32>,
    pub causer_id_eq: Option<i32>,
}

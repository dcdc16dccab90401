use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;
use validator::Validate;

use super::common::double_option;

#[derive(sqlx::Type)]
#[sqlx(type_name = "organisation_type", rename_all = "snake_case")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrganisationType {
    School,
    Club,
    Business,
    NonProfit,
    Government,
    Sports,
    Community,
    #[default]
    Other,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Organisation {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub short_name: Option<String>,
    pub owner_id: i32,
    pub parent_id: Option<i32>,
    #[serde(rename = "type")]
    pub org_type: OrganisationType,
    pub allow_member_form_creation: bool,
    pub require_form_approval: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organisation {
    /// Editable attributes as recorded in the activity log.
    pub fn attributes(&self) -> Value {
        json!({
            "name": self.name,
            "slug": self.slug,
            "short_name": self.short_name,
            "parent_id": self.parent_id,
            "type": self.org_type,
            "allow_member_form_creation": self.allow_member_form_creation,
            "require_form_approval": self.require_form_approval,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct OrganisationCreate {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub slug: Option<String>,
    #[validate(length(max = 50))]
    pub short_name: Option<String>,
    pub parent_id: Option<i32>,
    #[serde(rename = "type", default)]
    pub org_type: OrganisationType,
}

#[derive(Debug, Deserialize, Validate)]
pub struct OrganisationUpdate {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub slug: Option<String>,
    #[validate(length(max = 50))]
    pub short_name: Option<String>,
    /// Absent keeps the parent, `null` detaches the organisation.
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<i32>>,
    #[serde(rename = "type")]
    pub org_type: Option<OrganisationType>,
    pub allow_member_form_creation: Option<bool>,
    pub require_form_approval: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Insert {
    pub name: String,
    pub slug: String,
    pub short_name: Option<String>,
    pub owner_id: i32,
    pub parent_id: Option<i32>,
    pub org_type: OrganisationType,
}

#[derive(Debug, Clone)]
pub struct Update {
    pub name: String,
    pub slug: String,
    pub short_name: Option<String>,
    pub parent_id: Option<i32>,
    pub org_type: OrganisationType,
    pub allow_member_form_creation: bool,
    pub require_form_approval: bool,
}

impl Update {
    pub fn from_current(org: &Organisation) -> Self {
        Self {
            name: org.name.clone(),
            slug: org.slug.clone(),
            short_name: org.short_name.clone(),
            parent_id: org.parent_id,
            org_type: org.org_type,
            allow_member_form_creation: org.allow_member_form_creation,
            require_form_approval: org.require_form_approval,
        }
    }
}

#[derive(Debug, Default)]
pub struct Query {
    pub member_id: Option<i32>,
    pub parent_id_eq: Option<i32>,
}

/// One closure-table row: `ancestor_id` reaches `descendant_id` in `depth` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, FromRow)]
pub struct HierarchyRow {
    pub ancestor_id: i32,
    pub descendant_id: i32,
    pub depth: i32,
}

#[derive(Debug, Serialize, FromRow)]
pub struct Related {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub organisation: Organisation,
    pub depth: i32,
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

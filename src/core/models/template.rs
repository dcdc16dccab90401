use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use validator::Validate;

use super::form::{Owner, OwnerKind};
use super::schema::SchemaSave;

#[derive(sqlx::Type)]
#[sqlx(type_name = "template_visibility", rename_all = "snake_case")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TemplateVisibility {
    #[default]
    Private,
    Organisation,
    Public,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Template {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub owner_kind: OwnerKind,
    pub owner_id: i32,
    pub visibility: TemplateVisibility,
    pub data: Json<SchemaSave>,
    pub use_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    pub fn owner(&self) -> Owner {
        Owner {
            kind: self.owner_kind,
            id: self.owner_id,
        }
    }

    pub fn is_owned_by_user(&self, user_id: i32) -> bool {
        self.owner() == Owner::user(user_id)
    }

    /// `organisations` are the ids the user is a member of.
    pub fn can_be_used_by(&self, user_id: i32, organisations: &[i32]) -> bool {
        if self.is_owned_by_user(user_id) {
            return true;
        }
        match self.visibility {
            TemplateVisibility::Public => true,
            TemplateVisibility::Private => false,
            TemplateVisibility::Organisation => self.owner_kind == OwnerKind::Organisation && organisations.contains(&self.owner_id),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct TemplateCreate {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[serde(default)]
    pub visibility: TemplateVisibility,
    pub organisation_id: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TemplateUpdate {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub visibility: Option<TemplateVisibility>,
}

#[derive(Debug, Clone)]
pub struct Update {
    pub name: String,
    pub description: Option<String>,
    pub visibility: TemplateVisibility,
}

impl Update {
    pub fn apply(template: &Template, update: TemplateUpdate) -> Self {
        Self {
            name: update.name.unwrap_or_else(|| template.name.clone()),
            description: update.description.or_else(|| template.description.clone()),
            visibility: update.visibility.unwrap_or(template.visibility),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Search {
    pub q: Option<String>,
}

/// One rating per user and template; rating again replaces the earlier one.
#[derive(Debug, Deserialize, Validate)]
pub struct RatingCreate {
    #[validate(range(min = 1, max = 5))]
    pub rating: i32,
    #[validate(length(max = 2000))]
    pub review: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Rating {
    pub template_id: i32,
    pub user_id: i32,
    pub rating: i32,
    pub review: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingSummary {
    pub count: i64,
    pub average: Option<f64>,
}

impl RatingSummary {
    pub fn from_ratings(ratings: &[i32]) -> Self {
        let count = ratings.len() as i64;
        let average = (count > 0).then(|| ratings.iter().map(|&r| r as f64).sum::<f64>() / count as f64);
        Self { count, average }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct FormFromTemplate {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    pub organisation_id: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct Insert {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub owner: Owner,
    pub visibility: TemplateVisibility,
    pub data: SchemaSave,
}

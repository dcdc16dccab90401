use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

#[derive(sqlx::Type)]
#[sqlx(type_name = "form_publish_mode", rename_all = "snake_case")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    #[default]
    Manual,
    Scheduled,
}

#[derive(sqlx::Type)]
#[sqlx(type_name = "form_sharing_type", rename_all = "snake_case")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SharingType {
    #[default]
    AuthenticatedOnly,
    GuestAllowed,
    GuestEmailRequired,
}

#[derive(sqlx::Type)]
#[sqlx(type_name = "form_confirmation_email", rename_all = "snake_case")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationEmail {
    None,
    ConfirmationOnly,
    #[default]
    LinkedCopyOfResponses,
    DetailedCopyOfResponses,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FormSettings {
    pub form_id: i32,
    pub publish_mode: PublishMode,
    pub is_published: bool,
    pub open_at: Option<DateTime<Utc>>,
    pub close_at: Option<DateTime<Utc>>,
    pub max_submissions: Option<i32>,
    pub sharing_type: SharingType,
    pub allow_duplicate_responses: bool,
    pub allow_response_editing: bool,
    pub confirmation_email: ConfirmationEmail,
    pub confirmation_message: Option<String>,
}

impl FormSettings {
    pub fn defaults(form_id: i32) -> Self {
        Self {
            form_id,
            publish_mode: PublishMode::Manual,
            is_published: false,
            open_at: None,
            close_at: None,
            max_submissions: None,
            sharing_type: SharingType::AuthenticatedOnly,
            allow_duplicate_responses: true,
            allow_response_editing: true,
            confirmation_email: ConfirmationEmail::LinkedCopyOfResponses,
            confirmation_message: None,
        }
    }

    pub fn requires_email(&self) -> bool {
        self.sharing_type == SharingType::GuestEmailRequired
    }

    pub fn allows_guests(&self) -> bool {
        self.sharing_type != SharingType::AuthenticatedOnly
    }

    /// Merges an update onto the stored settings. Dates, cap and message are
    /// replaced wholesale; flags keep their value when absent.
    pub fn apply(self, update: SettingsUpdate) -> Self {
        Self {
            form_id: self.form_id,
            publish_mode: update.publish_mode.unwrap_or(self.publish_mode),
            is_published: update.is_published.unwrap_or(self.is_published),
            open_at: update.open_at,
            close_at: update.close_at,
            max_submissions: update.max_submissions,
            sharing_type: update.sharing_type,
            allow_duplicate_responses: update.allow_duplicate_responses.unwrap_or(self.allow_duplicate_responses),
            allow_response_editing: update.allow_response_editing.unwrap_or(self.allow_response_editing),
            confirmation_email: update.confirmation_email,
            confirmation_message: update.confirmation_message,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SettingsUpdate {
    pub publish_mode: Option<PublishMode>,
    pub is_published: Option<bool>,
    pub sharing_type: SharingType,
    pub confirmation_email: ConfirmationEmail,
    pub allow_duplicate_responses: Option<bool>,
    pub allow_response_editing: Option<bool>,
    pub open_at: Option<DateTime<Utc>>,
    pub close_at: Option<DateTime<Utc>>,
    #[validate(range(min = 1))]
    pub max_submissions: Option<i32>,
    #[validate(length(max = 2000))]
    pub confirmation_message: Option<String>,
}

impl SettingsUpdate {
    pub fn changes_publishing(&self, current: &FormSettings) -> bool {
        self.publish_mode.map_or(false, |m| m != current.publish_mode) || self.is_published.map_or(false, |p| p != current.is_published)
    }
}

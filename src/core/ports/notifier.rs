use serde::Serialize;
use uuid::Uuid;

use crate::core::models::settings::ConfirmationEmail;
use crate::error::Error;

/// Raised once a submission leaves the draft state.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionCreated {
    pub form_id: i32,
    pub form_code: Uuid,
    pub form_title: String,
    pub submission_id: i32,
    pub submission_code: Uuid,
    pub email: Option<String>,
    pub confirmation_email: ConfirmationEmail,
    pub confirmation_message: Option<String>,
}

impl SubmissionCreated {
    /// Whether the respondent should receive any confirmation mail.
    pub fn wants_confirmation(&self) -> bool {
        self.email.is_some() && self.confirmation_email != ConfirmationEmail::None
    }
}

pub trait SubmissionListener {
    async fn submission_created(&self, event: &SubmissionCreated) -> Result<(), Error>;
}

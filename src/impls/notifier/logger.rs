use crate::core::ports::notifier::{SubmissionCreated, SubmissionListener};
use crate::error::Error;

/// Records submission events in the application log. Mail delivery hooks in here.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl SubmissionListener for LogNotifier {
    async fn submission_created(&self, event: &SubmissionCreated) -> Result<(), Error> {
        log::info!(
            "submission {} received for form {} ({})",
            event.submission_code,
            event.form_code,
            event.form_title
        );
        if event.wants_confirmation() {
            log::info!(
                "confirmation {:?} due to {}",
                event.confirmation_email,
                event.email.as_deref().unwrap_or_default()
            );
        }
        Ok(())
    }
}

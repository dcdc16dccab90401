use chrono::{DateTime, Utc};

use crate::core::models::form::FormStatus;
use crate::core::models::settings::{FormSettings, PublishMode};

/// Derives the status of a form. `submissions` counts non-draft submissions.
///
/// A reached submission cap closes the form in either publish mode. Otherwise
/// manual forms follow `is_published`, and scheduled forms follow their window:
/// before `open_at` they are scheduled, after `close_at` closed, and without any
/// dates they stay drafts.
pub fn compute_status(settings: &FormSettings, now: DateTime<Utc>, submissions: i64) -> FormStatus {
    if let Some(max) = settings.max_submissions {
        if submissions >= i64::from(max) {
            return FormStatus::Closed;
        }
    }
    match settings.publish_mode {
        PublishMode::Manual => {
            if settings.is_published {
                FormStatus::Open
            } else {
                FormStatus::Draft
            }
        }
        PublishMode::Scheduled => {
            if settings.open_at.is_none() && settings.close_at.is_none() {
                return FormStatus::Draft;
            }
            if settings.open_at.map_or(false, |open| now < open) {
                return FormStatus::Scheduled;
            }
            if settings.close_at.map_or(false, |close| now > close) {
                return FormStatus::Closed;
            }
            FormStatus::Open
        }
    }
}

pub fn accepts_submissions(settings: &FormSettings, now: DateTime<Utc>, submissions: i64) -> bool {
    compute_status(settings, now, submissions) == FormStatus::Open
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration;

    fn scheduled(open_at: Option<DateTime<Utc>>, close_at: Option<DateTime<Utc>>) -> FormSettings {
        FormSettings {
            publish_mode: PublishMode::Scheduled,
            open_at,
            close_at,
            ..FormSettings::defaults(1)
        }
    }

    #[test]
    fn test_manual() {
        let now = Utc::now();
        let mut s = FormSettings::defaults(1);
        assert_eq!(compute_status(&s, now, 0), FormStatus::Draft);
        s.is_published = true;
        assert_eq!(compute_status(&s, now, 0), FormStatus::Open);
    }

    #[test]
    fn test_manual_ignores_dates() {
        let now = Utc::now();
        let mut s = FormSettings::defaults(1);
        s.is_published = true;
        s.close_at = Some(now - Duration::days(1));
        assert_eq!(compute_status(&s, now, 0), FormStatus::Open);
    }

    #[test]
    fn test_scheduled_window() {
        let now = Utc::now();
        let open = now - Duration::hours(1);
        let close = now + Duration::hours(1);
        assert_eq!(compute_status(&scheduled(Some(now + Duration::hours(1)), None), now, 0), FormStatus::Scheduled);
        assert_eq!(compute_status(&scheduled(Some(open), Some(close)), now, 0), FormStatus::Open);
        assert_eq!(compute_status(&scheduled(Some(open), Some(now - Duration::minutes(1))), now, 0), FormStatus::Closed);
        assert_eq!(compute_status(&scheduled(None, Some(close)), now, 0), FormStatus::Open);
        assert_eq!(compute_status(&scheduled(None, None), now, 0), FormStatus::Draft);
    }

    #[test]
    fn test_scheduled_boundaries_are_open() {
        let now = Utc::now();
        assert_eq!(compute_status(&scheduled(Some(now), None), now, 0), FormStatus::Open);
        assert_eq!(compute_status(&scheduled(None, Some(now)), now, 0), FormStatus::Open);
    }

    #[test]
    fn test_cap_closes_both_modes() {
        let now = Utc::now();
        let mut manual = FormSettings::defaults(1);
        manual.is_published = true;
        manual.max_submissions = Some(2);
        assert_eq!(compute_status(&manual, now, 1), FormStatus::Open);
        assert_eq!(compute_status(&manual, now, 2), FormStatus::Closed);

        let mut unpublished = FormSettings::defaults(1);
        unpublished.max_submissions = Some(1);
        assert_eq!(compute_status(&unpublished, now, 5), FormStatus::Closed);

        let mut window = scheduled(Some(now + Duration::days(1)), None);
        window.max_submissions = Some(1);
        assert_eq!(compute_status(&window, now, 1), FormStatus::Closed);
        assert!(!accepts_submissions(&window, now, 0));
    }
}

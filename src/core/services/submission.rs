use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;
use validator::{Validate, ValidateEmail};

use crate::core::models::{
    common::Pagination,
    schema::{FieldType, FormField},
    submission::{AnswerSubmit, AnswersSave, FieldInsert, Insert, Query, Submission, SubmissionDetail, SubmissionStatus, Update},
};
use crate::core::permission::{Permission, RoleGrants};
use crate::core::ports::notifier::{SubmissionCreated, SubmissionListener};
use crate::core::ports::repository::{FieldCommon, FormCommon, Store, SubmissionCommon, SubmissionFieldCommon, TxStore, UserCommon};
use crate::core::services::access::owner_permits;
use crate::core::services::form::{authorized_form, load_settings, submission_count};
use crate::core::services::gdpr::{default_retention_days, retention_until};
use crate::core::status::accepts_submissions;
use crate::error::{Error, FieldErrors};

fn is_blank(answer: &Option<Value>) -> bool {
    match answer {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn check_answer(field: &FormField, answer: &Value) -> Result<(), &'static str> {
    match field.field_type {
        FieldType::ShortAnswer => match answer.as_str() {
            Some(s) if s.chars().count() <= 255 => Ok(()),
            Some(_) => Err("must be at most 255 characters"),
            None => Err("must be text"),
        },
        FieldType::LongAnswer | FieldType::Textarea => answer.as_str().map(|_| ()).ok_or("must be text"),
        FieldType::Email => match answer.as_str() {
            Some(s) if s.validate_email() => Ok(()),
            _ => Err("must be a valid email address"),
        },
        FieldType::MultipleChoice => match answer.as_str() {
            Some(s) if field.options.iter().any(|o| o == s) => Ok(()),
            _ => Err("must be one of the options"),
        },
        FieldType::Checkbox => match answer {
            Value::Bool(_) if field.options.is_empty() => Ok(()),
            Value::Array(items) if items.iter().all(|i| i.as_str().map_or(false, |s| field.options.iter().any(|o| o == s))) => Ok(()),
            _ => Err("must be a list of the options"),
        },
    }
}

/// Checks submitted answers against the form's fields. Required fields are only
/// enforced when `complete` is set, against the stored answers merged with the
/// submitted ones.
pub fn validate_answers(fields: &[FormField], stored: &HashMap<i32, Option<Value>>, submitted: &[AnswerSubmit], complete: bool) -> Result<(), Error> {
    let by_id: HashMap<i32, &FormField> = fields.iter().map(|f| (f.id, f)).collect();
    let mut errors = FieldErrors::new();
    let mut merged = stored.clone();
    for a in submitted {
        let key = format!("answers.{}", a.form_field_id);
        match by_id.get(&a.form_field_id) {
            None => errors.entry(key).or_default().push("unknown field".into()),
            Some(field) => {
                if !is_blank(&a.answer) {
                    if let Some(value) = &a.answer {
                        if let Err(msg) = check_answer(field, value) {
                            errors.entry(key).or_default().push(msg.into());
                        }
                    }
                }
                merged.insert(a.form_field_id, a.answer.clone());
            }
        }
    }
    if complete {
        for field in fields.iter().filter(|f| f.required) {
            if merged.get(&field.id).map_or(true, is_blank) {
                errors.entry(format!("answers.{}", field.id)).or_default().push("this field is required".into());
            }
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidFields(errors))
    }
}

async fn detail<S>(store: &mut S, submission: Submission) -> Result<SubmissionDetail, Error>
where
    S: Store,
{
    let fields = SubmissionFieldCommon::query(store, submission.id).await?;
    Ok(SubmissionDetail { submission, fields })
}

/// Opens a submission for the respondent: resumes a draft, reopens an earlier
/// response for editing or starts a new draft, as the form's settings allow.
/// Only a new draft needs the form to be accepting responses.
pub async fn open_submission<T>(mut tx: T, user_id: Option<i32>, code: Uuid, now: DateTime<Utc>, fallback_retention_days: i64) -> Result<SubmissionDetail, Error>
where
    T: TxStore,
{
    let form = FormCommon::get_by_code(&mut tx, code).await?;
    let settings = load_settings(&mut tx, form.id).await?;
    if user_id.is_none() && !settings.allows_guests() {
        return Err(Error::Unauthenticated);
    }
    if let Some(uid) = user_id {
        let previous = SubmissionCommon::query(
            &mut tx,
            &Query {
                form_id_eq: Some(form.id),
                user_id_eq: Some(uid),
                ..default::default()
            },
            None,
        )
        .await?;
        if let Some(draft) = previous.iter().find(|s| s.is_draft()) {
            let detail = detail(&mut tx, draft.clone()).await?;
            tx.commit().await?;
            return Ok(detail);
        }
        if let Some(latest) = previous.into_iter().next() {
            if !settings.allow_duplicate_responses {
                if !settings.allow_response_editing {
                    return Err(Error::BusinessError("you have already responded to this form".into()));
                }
                let detail = detail(&mut tx, latest).await?;
                tx.commit().await?;
                return Ok(detail);
            }
        }
    }
    if !accepts_submissions(&settings, now, submission_count(&mut tx, form.id).await?) {
        return Err(Error::BusinessError("this form is not accepting responses".into()));
    }
    let days = default_retention_days(&mut tx, fallback_retention_days).await?;
    let id = SubmissionCommon::insert(
        &mut tx,
        Insert {
            code: Uuid::new_v4(),
            form_id: form.id,
            user_id,
            status: SubmissionStatus::Draft,
            retention_until: retention_until(now, days),
        },
    )
    .await?;
    let fields = FieldCommon::query(&mut tx, form.id).await?;
    SubmissionFieldCommon::bulk_insert(
        &mut tx,
        fields
            .iter()
            .map(|f| FieldInsert {
                submission_id: id,
                form_field_id: f.id,
                answer: None,
            })
            .collect(),
    )
    .await?;
    let submission = SubmissionCommon::get(&mut tx, id).await?;
    let detail = detail(&mut tx, submission).await?;
    tx.commit().await?;
    Ok(detail)
}

/// Respondents reach their own submission; guest submissions are reached by
/// code alone. Anyone else needs `permission` on the form.
async fn accessible_submission<S, G>(store: &mut S, grants: &G, user_id: Option<i32>, code: Uuid, permission: Permission) -> Result<Submission, Error>
where
    S: Store,
    G: RoleGrants,
{
    let submission = SubmissionCommon::get_by_code(store, code).await?;
    match (submission.user_id, user_id) {
        (None, _) => Ok(submission),
        (Some(owner), Some(uid)) if owner == uid => Ok(submission),
        (Some(_), Some(uid)) => {
            let form = FormCommon::get(store, submission.form_id).await?;
            if owner_permits(store, grants, form.owner(), uid, permission).await? {
                Ok(submission)
            } else {
                Err(Error::Unauthorized)
            }
        }
        (Some(_), None) => Err(Error::Unauthenticated),
    }
}

pub async fn get_submission<S, G>(db: &mut S, grants: &G, user_id: Option<i32>, code: Uuid) -> Result<SubmissionDetail, Error>
where
    S: Store,
    G: RoleGrants,
{
    let submission = accessible_submission(db, grants, user_id, code, Permission::SubmissionsView).await?;
    detail(db, submission).await
}

pub async fn save_answers<T, L>(mut tx: T, listener: &L, user_id: Option<i32>, code: Uuid, save: AnswersSave, now: DateTime<Utc>) -> Result<SubmissionDetail, Error>
where
    T: TxStore,
    L: SubmissionListener,
{
    save.validate()?;
    let submission = SubmissionCommon::get_by_code(&mut tx, code).await?;
    if submission.user_id.is_some() && submission.user_id != user_id {
        return Err(Error::Unauthorized);
    }
    let form = FormCommon::get(&mut tx, submission.form_id).await?;
    let settings = load_settings(&mut tx, form.id).await?;
    if submission.is_draft() {
        if !accepts_submissions(&settings, now, submission_count(&mut tx, form.id).await?) {
            return Err(Error::BusinessError("this form is not accepting responses".into()));
        }
    } else if !settings.allow_response_editing {
        return Err(Error::BusinessError("responses to this form cannot be edited".into()));
    }

    let mut email = save.email.clone().or_else(|| submission.email.clone());
    if email.is_none() {
        if let Some(uid) = submission.user_id {
            email = Some(UserCommon::get(&mut tx, uid).await?.email);
        }
    }
    if settings.requires_email() && email.is_none() {
        return Err(Error::field("email", "an email address is required for this form"));
    }
    if !settings.allow_duplicate_responses {
        if let Some(email) = &email {
            if SubmissionCommon::email_taken(&mut tx, form.id, email, submission.id).await? {
                return Err(Error::BusinessError("a response with this email address already exists".into()));
            }
        }
    }

    let fields = FieldCommon::query(&mut tx, form.id).await?;
    let stored: HashMap<i32, Option<Value>> = SubmissionFieldCommon::query(&mut tx, submission.id)
        .await?
        .into_iter()
        .map(|a| (a.form_field_id, a.answer.map(|v| v.0)))
        .collect();
    validate_answers(&fields, &stored, &save.answers, save.complete)?;
    for a in save.answers {
        SubmissionFieldCommon::upsert(
            &mut tx,
            FieldInsert {
                submission_id: submission.id,
                form_field_id: a.form_field_id,
                answer: a.answer,
            },
        )
        .await?;
    }

    let completing = save.complete && submission.is_draft();
    let status = if completing { SubmissionStatus::Pending } else { submission.status };
    SubmissionCommon::update(
        &mut tx,
        submission.id,
        Update {
            email: email.clone(),
            guest_name: save.guest_name.or_else(|| submission.guest_name.clone()),
            status,
        },
    )
    .await?;
    let saved = SubmissionCommon::get(&mut tx, submission.id).await?;
    let detail = detail(&mut tx, saved).await?;
    tx.commit().await?;

    if completing {
        log::info!("submission {} completed for form {}", submission.code, form.code);
        let event = SubmissionCreated {
            form_id: form.id,
            form_code: form.code,
            form_title: form.title,
            submission_id: submission.id,
            submission_code: submission.code,
            email,
            confirmation_email: settings.confirmation_email,
            confirmation_message: settings.confirmation_message,
        };
        if let Err(e) = listener.submission_created(&event).await {
            log::warn!("submission listener failed for {}: {}", submission.code, e);
        }
    }
    Ok(detail)
}

pub async fn list_submissions<S, G>(db: &mut S, grants: &G, user_id: i32, code: Uuid, pagination: Pagination) -> Result<(Vec<Submission>, i64), Error>
where
    S: Store,
    G: RoleGrants,
{
    let form = authorized_form(db, grants, user_id, code, Permission::SubmissionsView).await?;
    let query = Query {
        form_id_eq: Some(form.id),
        exclude_drafts: true,
        ..default::default()
    };
    let total = SubmissionCommon::count(db, &query).await?;
    let list = SubmissionCommon::query(db, &query, Some(pagination)).await?;
    Ok((list, total))
}

pub async fn delete_submission<T, G>(mut tx: T, grants: &G, user_id: i32, code: Uuid) -> Result<(), Error>
where
    T: TxStore,
    G: RoleGrants,
{
    let submission = SubmissionCommon::get_by_code(&mut tx, code).await?;
    let form = FormCommon::get(&mut tx, submission.form_id).await?;
    if !owner_permits(&mut tx, grants, form.owner(), user_id, Permission::FormsDelete).await? {
        return Err(Error::Unauthorized);
    }
    SubmissionFieldCommon::delete_by_submissions(&mut tx, &[submission.id]).await?;
    SubmissionCommon::delete(&mut tx, &[submission.id]).await?;
    tx.commit().await?;
    Ok(())
}

/// Marks a pending submission as reviewed.
pub async fn review_submission<T, G>(mut tx: T, grants: &G, user_id: i32, code: Uuid) -> Result<Submission, Error>
where
    T: TxStore,
    G: RoleGrants,
{
    let submission = SubmissionCommon::get_by_code(&mut tx, code).await?;
    let form = FormCommon::get(&mut tx, submission.form_id).await?;
    if !owner_permits(&mut tx, grants, form.owner(), user_id, Permission::SubmissionsView).await? {
        return Err(Error::Unauthorized);
    }
    if submission.status != SubmissionStatus::Pending {
        return Err(Error::BusinessError("only pending submissions can be reviewed".into()));
    }
    SubmissionCommon::set_status(&mut tx, submission.id, SubmissionStatus::Completed).await?;
    let submission = SubmissionCommon::get(&mut tx, submission.id).await?;
    tx.commit().await?;
    Ok(submission)
}

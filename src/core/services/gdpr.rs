use chrono::{DateTime, Duration, Utc};
use hex::ToHex;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use validator::Validate;

use crate::core::models::gdpr::{
    AccessRequest, AccessRequestCreate, ActorType, AuditAction, AuditFilter, AuditInsert, AuditLog, Breakdown, ComplianceReport, ConsentCreate, ConsentInsert, ExportedAnswer, ExportedConsent,
    ExportedSubmission, ExportedUser, Origin, PendingRequests, Rejection, ReportPeriod, RequestCompleted, RequestInsert, RequestUpdate, RetentionPolicy, RetentionPolicyCreate,
    RetentionSummary, RetentionSweep, UserExport,
};
use crate::core::models::common::Pagination;
use crate::core::models::organisation::Query as OrganisationQuery;
use crate::core::models::submission::Query as SubmissionQuery;
use crate::core::ports::repository::{ActivityCommon, FieldCommon, FormCommon, GdprCommon, OrganisationCommon, Store, SubmissionCommon, SubmissionFieldCommon, TxStore, UserCommon};
use crate::core::services::access::require_admin;
use crate::error::Error;

pub const RESPONSE_DEADLINE_DAYS: i64 = 30;
pub const DOWNLOAD_VALID_DAYS: i64 = 7;
const TOKEN_LENGTH: usize = 64;

fn audit(action: AuditAction, entity_type: &'static str, entity_id: i32, user_id: Option<i32>, actor_type: ActorType, origin: &Origin) -> AuditInsert {
    AuditInsert {
        action,
        entity_type,
        entity_id,
        user_id,
        actor_type,
        reason: None,
        data_summary: None,
        ip_address: origin.ip_address.clone(),
        user_agent: origin.user_agent.clone(),
    }
}

async fn record_audit<S>(store: &mut S, entry: AuditInsert) -> Result<i32, Error>
where
    S: Store,
{
    let (action, entity_type, entity_id) = (entry.action, entry.entity_type, entry.entity_id);
    let id = GdprCommon::insert_audit(store, entry).await?;
    log::debug!("audit {}: {} on {} {}", id, action.as_str(), entity_type, entity_id);
    Ok(id)
}

fn random_token() -> String {
    thread_rng().sample_iter(&Alphanumeric).take(TOKEN_LENGTH).map(char::from).collect()
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token);
    hasher.finalize().encode_hex()
}

/// Expiry of a submission created at `now`; `None` keeps it indefinitely.
pub fn retention_until(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    (days > 0).then(|| now + Duration::days(days))
}

/// Retention of the current default policy, or `fallback` when none is set.
pub async fn default_retention_days<S>(store: &mut S, fallback: i64) -> Result<i64, Error>
where
    S: Store,
{
    Ok(GdprCommon::default_policy(store).await?.map_or(fallback, |p| p.retention_days as i64))
}

pub async fn record_consent<T>(mut tx: T, user_id: i32, consent: ConsentCreate, origin: Origin) -> Result<i32, Error>
where
    T: TxStore,
{
    consent.validate()?;
    let id = GdprCommon::insert_consent(
        &mut tx,
        ConsentInsert {
            user_id,
            consent_type: consent.consent_type.clone(),
            given: consent.given,
            version: consent.version,
            ip_address: origin.ip_address,
            user_agent: origin.user_agent,
        },
    )
    .await?;
    GdprCommon::touch_user_consent(&mut tx, user_id, &consent.consent_type, consent.given).await?;
    tx.commit().await?;
    log::info!("user {} {} consent {}", user_id, if consent.given { "gave" } else { "withdrew" }, consent.consent_type);
    Ok(id)
}

pub async fn create_request<T>(mut tx: T, user_id: i32, create: AccessRequestCreate, now: DateTime<Utc>) -> Result<AccessRequest, Error>
where
    T: TxStore,
{
    create.validate()?;
    let id = GdprCommon::insert_request(
        &mut tx,
        RequestInsert {
            user_id,
            request_type: create.request_type,
            reason: create.reason,
            requested_at: now,
            deadline_at: now + Duration::days(RESPONSE_DEADLINE_DAYS),
        },
    )
    .await?;
    let request = GdprCommon::get_request(&mut tx, id).await?;
    tx.commit().await?;
    log::info!("user {} filed access request {} ({:?})", user_id, id, request.request_type);
    Ok(request)
}

async fn collect_export<S>(store: &mut S, user_id: i32) -> Result<UserExport, Error>
where
    S: Store,
{
    let user = UserCommon::get(store, user_id).await?;
    let submissions = SubmissionCommon::query(
        store,
        &SubmissionQuery {
            user_id_eq: Some(user_id),
            ..default::default()
        },
        None,
    )
    .await?;
    let mut forms: HashMap<i32, (Option<String>, HashMap<i32, String>)> = HashMap::new();
    let mut exported = Vec::with_capacity(submissions.len());
    for submission in submissions {
        if !forms.contains_key(&submission.form_id) {
            let title = FormCommon::get(store, submission.form_id).await.ok().map(|f| f.title);
            let labels = FieldCommon::query(store, submission.form_id).await?.into_iter().map(|f| (f.id, f.label)).collect();
            forms.insert(submission.form_id, (title, labels));
        }
        let (form_title, labels) = match forms.get(&submission.form_id) {
            Some((title, labels)) => (title.clone(), labels),
            None => continue,
        };
        let fields = SubmissionFieldCommon::query(store, submission.id)
            .await?
            .into_iter()
            .map(|a| ExportedAnswer {
                field_label: labels.get(&a.form_field_id).cloned(),
                answer: a.answer.map(|v| v.0),
            })
            .collect();
        exported.push(ExportedSubmission {
            id: submission.id,
            form_id: submission.form_id,
            form_title,
            email: submission.email,
            status: submission.status,
            created_at: submission.created_at,
            fields,
        });
    }
    Ok(UserExport {
        user: ExportedUser {
            id: user.id,
            name: user.name,
            email: user.email,
            created_at: user.created_at,
            updated_at: user.updated_at,
        },
        gdpr: ExportedConsent {
            consent_gdpr_at: user.consent_gdpr_at,
            consent_marketing_at: user.consent_marketing_at,
            history: GdprCommon::consents(store, user_id).await?,
        },
        submissions: exported,
    })
}

/// Everything stored about the user. The export itself is audited.
pub async fn export_user_data<T>(mut tx: T, user_id: i32, origin: Origin) -> Result<UserExport, Error>
where
    T: TxStore,
{
    let export = collect_export(&mut tx, user_id).await?;
    let mut entry = audit(AuditAction::DataExported, "user", user_id, Some(user_id), ActorType::User, &origin);
    entry.data_summary = Some(json!({ "submissions": export.submissions.len() }));
    record_audit(&mut tx, entry).await?;
    tx.commit().await?;
    log::info!("user {} exported their data", user_id);
    Ok(export)
}

async fn open_request<S>(store: &mut S, id: i32) -> Result<AccessRequest, Error>
where
    S: Store,
{
    let request = GdprCommon::get_request(store, id).await?;
    if !request.is_open() {
        return Err(Error::BusinessError(format!("request {} is already {}", id, request.status.as_str())));
    }
    Ok(request)
}

/// Attaches the subject's export to the request and hands out a one-off
/// download token. Only the digest of the token is stored.
pub async fn complete_request<T>(mut tx: T, admin_id: i32, id: i32, now: DateTime<Utc>, origin: Origin) -> Result<RequestCompleted, Error>
where
    T: TxStore,
{
    require_admin(&mut tx, admin_id).await?;
    let request = open_request(&mut tx, id).await?;
    let export = collect_export(&mut tx, request.user_id).await?;
    let response_data = serde_json::to_value(&export).map_err(|e| Error::ServerError(e.to_string()))?;
    let token = random_token();
    let token_expires_at = now + Duration::days(DOWNLOAD_VALID_DAYS);
    GdprCommon::update_request(
        &mut tx,
        id,
        RequestUpdate::Complete {
            completed_at: now,
            token_hash: hash_token(&token),
            token_expires_at,
            response_data,
        },
    )
    .await?;
    let mut entry = audit(AuditAction::DsarCompleted, "dsar_request", id, Some(request.user_id), ActorType::Admin, &origin);
    entry.data_summary = Some(json!({ "completed_by": admin_id }));
    record_audit(&mut tx, entry).await?;
    tx.commit().await?;
    log::info!("access request {} completed by admin {}", id, admin_id);
    Ok(RequestCompleted {
        id,
        download_token: token,
        token_expires_at,
    })
}

pub async fn reject_request<T>(mut tx: T, admin_id: i32, id: i32, rejection: Rejection, now: DateTime<Utc>, origin: Origin) -> Result<AccessRequest, Error>
where
    T: TxStore,
{
    rejection.validate()?;
    require_admin(&mut tx, admin_id).await?;
    let request = open_request(&mut tx, id).await?;
    GdprCommon::update_request(
        &mut tx,
        id,
        RequestUpdate::Reject {
            completed_at: now,
            reason: rejection.reason.clone(),
        },
    )
    .await?;
    let mut entry = audit(AuditAction::DsarRejected, "dsar_request", id, Some(request.user_id), ActorType::Admin, &origin);
    entry.reason = Some(rejection.reason);
    record_audit(&mut tx, entry).await?;
    let request = GdprCommon::get_request(&mut tx, id).await?;
    tx.commit().await?;
    log::info!("access request {} rejected by admin {}", id, admin_id);
    Ok(request)
}

pub async fn pending_requests<S>(db: &mut S, admin_id: i32, now: DateTime<Utc>) -> Result<PendingRequests, Error>
where
    S: Store,
{
    require_admin(db, admin_id).await?;
    Ok(PendingRequests::new(GdprCommon::pending_requests(db).await?, now))
}

/// Newest first, optionally narrowed to one data subject.
pub async fn audit_trail<S>(db: &mut S, admin_id: i32, filter: AuditFilter, pagination: Pagination) -> Result<(Vec<AuditLog>, i64), Error>
where
    S: Store,
{
    require_admin(db, admin_id).await?;
    let total = GdprCommon::count_audit_logs(db, filter.user_id).await?;
    let logs = GdprCommon::audit_logs(db, filter.user_id, Some(pagination)).await?;
    Ok((logs, total))
}

/// Response data of a completed request, looked up by its download token.
pub async fn download<S>(db: &mut S, token: &str, now: DateTime<Utc>) -> Result<Value, Error>
where
    S: Store,
{
    let request = GdprCommon::get_request_by_token_hash(db, &hash_token(token))
        .await?
        .ok_or_else(|| Error::NotFound("download".into()))?;
    if !request.is_token_valid(now) {
        return Err(Error::BusinessError("this download link has expired".into()));
    }
    request.response_data.map(|d| d.0).ok_or_else(|| Error::NotFound("download".into()))
}

/// Deletes the user together with their submissions. Start and completion
/// are both audited in the same transaction. Owners must hand over their
/// organisations first.
pub async fn erase_user<T>(mut tx: T, user_id: i32, actor_type: ActorType, reason: Option<String>, origin: Origin) -> Result<u64, Error>
where
    T: TxStore,
{
    UserCommon::get(&mut tx, user_id).await?;
    let owned = OrganisationCommon::query(
        &mut tx,
        &OrganisationQuery {
            member_id: Some(user_id),
            ..default::default()
        },
    )
    .await?
    .into_iter()
    .filter(|o| o.owner_id == user_id)
    .count();
    if owned > 0 {
        return Err(Error::BusinessError("transfer or delete the organisations you own first".into()));
    }
    let mut started = audit(AuditAction::DataDeletionStarted, "user", user_id, Some(user_id), actor_type, &origin);
    started.reason = reason.clone();
    record_audit(&mut tx, started).await?;

    let ids: Vec<i32> = SubmissionCommon::query(
        &mut tx,
        &SubmissionQuery {
            user_id_eq: Some(user_id),
            ..default::default()
        },
        None,
    )
    .await?
    .into_iter()
    .map(|s| s.id)
    .collect();
    let answers = SubmissionFieldCommon::delete_by_submissions(&mut tx, &ids).await?;
    let submissions = SubmissionCommon::delete(&mut tx, &ids).await?;
    ActivityCommon::forget_causer(&mut tx, user_id).await?;
    UserCommon::delete(&mut tx, user_id).await?;

    let mut completed = audit(AuditAction::DataDeletionCompleted, "user", user_id, Some(user_id), actor_type, &origin);
    completed.reason = reason;
    completed.data_summary = Some(json!({ "submissions": submissions, "answers": answers }));
    record_audit(&mut tx, completed).await?;
    tx.commit().await?;
    log::info!("user {} erased with {} submissions", user_id, submissions);
    Ok(submissions)
}

pub async fn set_retention_policy<T>(mut tx: T, admin_id: i32, create: RetentionPolicyCreate, now: DateTime<Utc>) -> Result<RetentionPolicy, Error>
where
    T: TxStore,
{
    create.validate()?;
    require_admin(&mut tx, admin_id).await?;
    if create.is_default {
        GdprCommon::clear_default_policy(&mut tx).await?;
    }
    let id = GdprCommon::insert_policy(&mut tx, create, now).await?;
    let policy = GdprCommon::policies(&mut tx)
        .await?
        .into_iter()
        .find(|p| p.id == id)
        .ok_or_else(|| Error::NotFound("retention policy".into()))?;
    tx.commit().await?;
    log::info!("retention policy {} ({} days) set by admin {}", policy.name, policy.retention_days, admin_id);
    Ok(policy)
}

/// Deletes every submission past its retention date. A dry run only reports
/// what would be deleted.
pub async fn apply_retention_policies<T>(mut tx: T, now: DateTime<Utc>, dry_run: bool) -> Result<RetentionSweep, Error>
where
    T: TxStore,
{
    let expired = SubmissionCommon::expired(&mut tx, now).await?;
    let submission_ids: Vec<i32> = expired.iter().map(|s| s.id).collect();
    if dry_run {
        tx.rollback().await?;
        log::info!("retention dry run: {} submissions would be deleted", submission_ids.len());
        return Ok(RetentionSweep { dry_run, submission_ids });
    }
    SubmissionFieldCommon::delete_by_submissions(&mut tx, &submission_ids).await?;
    SubmissionCommon::delete(&mut tx, &submission_ids).await?;
    for submission in &expired {
        let mut entry = audit(
            AuditAction::DataDeletedRetentionPolicy,
            "submission",
            submission.id,
            submission.user_id,
            ActorType::AutomatedDeletion,
            &Origin::default(),
        );
        entry.data_summary = Some(json!({ "form_id": submission.form_id, "retention_until": submission.retention_until }));
        record_audit(&mut tx, entry).await?;
    }
    tx.commit().await?;
    log::info!("retention sweep deleted {} submissions", submission_ids.len());
    Ok(RetentionSweep { dry_run, submission_ids })
}

pub async fn compliance_report<S>(db: &mut S, admin_id: i32, period: ReportPeriod, now: DateTime<Utc>) -> Result<ComplianceReport, Error>
where
    S: Store,
{
    require_admin(db, admin_id).await?;
    if period.to < period.from {
        return Err(Error::field("to", "must not be before from"));
    }
    Ok(ComplianceReport {
        from: period.from,
        to: period.to,
        audit_logs: Breakdown::from_counts(GdprCommon::audit_counts(db, period.from, period.to).await?),
        consent_records: Breakdown::from_counts(GdprCommon::consent_counts(db, period.from, period.to).await?),
        dsars: Breakdown::from_counts(GdprCommon::request_counts(db, period.from, period.to).await?),
        overdue_dsars: GdprCommon::overdue_requests(db, now).await?,
        data_retention: RetentionSummary {
            policies: GdprCommon::policies(db).await?,
            submissions_pending_deletion: SubmissionCommon::expired(db, now).await?.len() as i64,
        },
    })
}

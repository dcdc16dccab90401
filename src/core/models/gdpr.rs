use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;
use validator::Validate;

use super::submission::SubmissionStatus;

#[derive(sqlx::Type)]
#[sqlx(type_name = "gdpr_audit_action", rename_all = "snake_case")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    DataExported,
    DataDeletionStarted,
    DataDeletionCompleted,
    DataDeletedRetentionPolicy,
    DsarCompleted,
    DsarRejected,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::DataExported => "data_exported",
            AuditAction::DataDeletionStarted => "data_deletion_started",
            AuditAction::DataDeletionCompleted => "data_deletion_completed",
            AuditAction::DataDeletedRetentionPolicy => "data_deleted_retention_policy",
            AuditAction::DsarCompleted => "dsar_completed",
            AuditAction::DsarRejected => "dsar_rejected",
        }
    }
}

#[derive(sqlx::Type)]
#[sqlx(type_name = "gdpr_actor_type", rename_all = "snake_case")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    Admin,
    System,
    AutomatedDeletion,
}

/// Where a request came from, recorded alongside consent and audit rows.
#[derive(Debug, Clone, Default)]
pub struct Origin {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Append-only; rows are never updated or deleted.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditLog {
    pub id: i32,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: i32,
    pub user_id: Option<i32>,
    pub actor_type: ActorType,
    pub reason: Option<String>,
    pub data_summary: Option<Json<Value>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuditInsert {
    pub action: AuditAction,
    pub entity_type: &'static str,
    pub entity_id: i32,
    pub user_id: Option<i32>,
    pub actor_type: ActorType,
    pub reason: Option<String>,
    pub data_summary: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConsentLog {
    pub id: i32,
    pub user_id: i32,
    pub consent_type: String,
    pub given: bool,
    pub version: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn first_version() -> String {
    "1.0".into()
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConsentCreate {
    #[validate(length(min = 1, max = 100))]
    pub consent_type: String,
    pub given: bool,
    #[serde(default = "first_version")]
    #[validate(length(min = 1, max = 20))]
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct ConsentInsert {
    pub user_id: i32,
    pub consent_type: String,
    pub given: bool,
    pub version: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RetentionPolicy {
    pub id: i32,
    pub name: String,
    /// 0 keeps data indefinitely.
    pub retention_days: i32,
    pub description: Option<String>,
    pub is_default: bool,
    pub applies_from: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RetentionPolicyCreate {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(range(min = 0, max = 36500))]
    pub retention_days: i32,
    pub description: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(sqlx::Type)]
#[sqlx(type_name = "dsar_request_type", rename_all = "snake_case")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Access,
    Export,
    Deletion,
    Rectification,
}

#[derive(sqlx::Type)]
#[sqlx(type_name = "dsar_status", rename_all = "snake_case")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Rejected => "rejected",
        }
    }
}

/// A data subject access request. Only the SHA-256 digest of the download
/// token is kept.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AccessRequest {
    pub id: i32,
    pub user_id: i32,
    pub request_type: RequestType,
    pub status: RequestStatus,
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub response_data: Option<Json<Value>>,
    #[serde(skip_serializing)]
    pub download_token_hash: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl AccessRequest {
    pub fn is_open(&self) -> bool {
        matches!(self.status, RequestStatus::Pending | RequestStatus::Processing)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.deadline_at < now
    }

    pub fn is_token_valid(&self, now: DateTime<Utc>) -> bool {
        self.status == RequestStatus::Completed && self.token_expires_at.map_or(false, |expires| now < expires)
    }
}

/// Requests whose deadline falls within this many days count as urgent.
pub const URGENT_WITHIN_DAYS: i64 = 5;

/// The admin queue of pending requests, earliest deadline first.
#[derive(Debug, Serialize)]
pub struct PendingRequests {
    pub total: i64,
    pub urgent: i64,
    pub overdue: i64,
    pub requests: Vec<AccessRequest>,
}

impl PendingRequests {
    pub fn new(requests: Vec<AccessRequest>, now: DateTime<Utc>) -> Self {
        let urgent_before = now + Duration::days(URGENT_WITHIN_DAYS);
        Self {
            total: requests.len() as i64,
            urgent: requests.iter().filter(|r| r.deadline_at < urgent_before).count() as i64,
            overdue: requests.iter().filter(|r| r.is_overdue(now)).count() as i64,
            requests,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditFilter {
    pub user_id: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AccessRequestCreate {
    pub request_type: RequestType,
    #[validate(length(max = 2000))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct Rejection {
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RequestInsert {
    pub user_id: i32,
    pub request_type: RequestType,
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RequestUpdate {
    Complete {
        completed_at: DateTime<Utc>,
        token_hash: String,
        token_expires_at: DateTime<Utc>,
        response_data: Value,
    },
    Reject {
        completed_at: DateTime<Utc>,
        reason: String,
    },
}

#[derive(Debug, Serialize)]
pub struct RequestCompleted {
    pub id: i32,
    pub download_token: String,
    pub token_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportedAnswer {
    pub field_label: Option<String>,
    pub answer: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportedSubmission {
    pub id: i32,
    pub form_id: i32,
    pub form_title: Option<String>,
    pub email: Option<String>,
    pub status: SubmissionStatus,
    pub created_at: DateTime<Utc>,
    pub fields: Vec<ExportedAnswer>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportedUser {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportedConsent {
    pub consent_gdpr_at: Option<DateTime<Utc>>,
    pub consent_marketing_at: Option<DateTime<Utc>>,
    /// Every consent given or withdrawn, oldest first.
    pub history: Vec<ConsentLog>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserExport {
    pub user: ExportedUser,
    pub gdpr: ExportedConsent,
    pub submissions: Vec<ExportedSubmission>,
}

#[derive(Debug, Deserialize)]
pub struct ReportPeriod {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Breakdown {
    pub total: i64,
    pub by: BTreeMap<String, i64>,
}

impl Breakdown {
    pub fn from_counts(counts: Vec<(String, i64)>) -> Self {
        let total = counts.iter().map(|(_, n)| n).sum();
        Self {
            total,
            by: counts.into_iter().collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RetentionSummary {
    pub policies: Vec<RetentionPolicy>,
    pub submissions_pending_deletion: i64,
}

#[derive(Debug, Serialize)]
pub struct ComplianceReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub audit_logs: Breakdown,
    pub consent_records: Breakdown,
    pub dsars: Breakdown,
    pub overdue_dsars: i64,
    pub data_retention: RetentionSummary,
}

#[derive(Debug, Serialize)]
pub struct RetentionSweep {
    pub dry_run: bool,
    pub submission_ids: Vec<i32>,
}

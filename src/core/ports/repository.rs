use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::models::{
    activity::{Activity, Insert as ActivityInsert, Query as ActivityQuery},
    common::Pagination,
    form::{Form, Insert as FormInsert, Query as FormQuery, Update as FormUpdate},
    gdpr::{AccessRequest, AuditInsert, AuditLog, ConsentInsert, ConsentLog, RequestInsert, RequestUpdate, RetentionPolicy, RetentionPolicyCreate},
    member::{Insert as MemberInsert, Member, MemberDetail, Role},
    organisation::{HierarchyRow, Insert as OrganisationInsert, Organisation, Query as OrganisationQuery, Related, Update as OrganisationUpdate},
    schema::{FieldInsert, FormField, Section, SectionInsert},
    settings::FormSettings,
    submission::{FieldInsert as AnswerInsert, Insert as SubmissionInsert, Query as SubmissionQuery, Submission, SubmissionField, SubmissionStatus, Update as SubmissionUpdate},
    template::{Insert as TemplateInsert, Rating, Template, Update as TemplateUpdate},
    user::User,
};
use crate::error::Error;

pub trait FormCommon {
    async fn insert(&mut self, data: FormInsert) -> Result<i32, Error>;
    async fn update(&mut self, id: i32, data: FormUpdate) -> Result<(), Error>;
    async fn get(&mut self, id: i32) -> Result<Form, Error>;
    async fn get_by_code(&mut self, code: Uuid) -> Result<Form, Error>;
    async fn query(&mut self, query: &FormQuery, pagination: Option<Pagination>) -> Result<Vec<Form>, Error>;
    async fn count(&mut self, query: &FormQuery) -> Result<i64, Error>;
    /// Removes the form together with its settings, schema and submissions.
    async fn delete(&mut self, id: i32) -> Result<(), Error>;
}

pub trait SettingsCommon {
    async fn get(&mut self, form_id: i32) -> Result<Option<FormSettings>, Error>;
    async fn upsert(&mut self, settings: &FormSettings) -> Result<(), Error>;
}

pub trait SectionCommon {
    async fn insert(&mut self, data: SectionInsert) -> Result<i32, Error>;
    async fn update(&mut self, id: i32, data: SectionInsert) -> Result<(), Error>;
    async fn query(&mut self, form_id: i32) -> Result<Vec<Section>, Error>;
    async fn delete_except(&mut self, form_id: i32, keep: &[i32]) -> Result<u64, Error>;
}

pub trait FieldCommon {
    async fn insert(&mut self, data: FieldInsert) -> Result<i32, Error>;
    async fn update(&mut self, id: i32, data: FieldInsert) -> Result<(), Error>;
    async fn query(&mut self, form_id: i32) -> Result<Vec<FormField>, Error>;
    async fn delete_except(&mut self, form_id: i32, keep: &[i32]) -> Result<u64, Error>;
}

pub trait SubmissionCommon {
    async fn insert(&mut self, data: SubmissionInsert) -> Result<i32, Error>;
    async fn update(&mut self, id: i32, data: SubmissionUpdate) -> Result<(), Error>;
    async fn set_status(&mut self, id: i32, status: SubmissionStatus) -> Result<(), Error>;
    async fn get(&mut self, id: i32) -> Result<Submission, Error>;
    async fn get_by_code(&mut self, code: Uuid) -> Result<Submission, Error>;
    async fn query(&mut self, query: &SubmissionQuery, pagination: Option<Pagination>) -> Result<Vec<Submission>, Error>;
    async fn count(&mut self, query: &SubmissionQuery) -> Result<i64, Error>;
    /// Whether another non-draft submission of the form already uses `email`.
    async fn email_taken(&mut self, form_id: i32, email: &str, exclude_id: i32) -> Result<bool, Error>;
    async fn expired(&mut self, before: DateTime<Utc>) -> Result<Vec<Submission>, Error>;
    async fn delete(&mut self, ids: &[i32]) -> Result<u64, Error>;
}

pub trait SubmissionFieldCommon {
    async fn bulk_insert(&mut self, answers: Vec<AnswerInsert>) -> Result<(), Error>;
    async fn query(&mut self, submission_id: i32) -> Result<Vec<SubmissionField>, Error>;
    async fn upsert(&mut self, answer: AnswerInsert) -> Result<(), Error>;
    async fn delete_by_submissions(&mut self, submission_ids: &[i32]) -> Result<u64, Error>;
}

pub trait OrganisationCommon {
    async fn insert(&mut self, data: OrganisationInsert) -> Result<i32, Error>;
    async fn update(&mut self, id: i32, data: OrganisationUpdate) -> Result<(), Error>;
    async fn get(&mut self, id: i32) -> Result<Organisation, Error>;
    async fn query(&mut self, query: &OrganisationQuery) -> Result<Vec<Organisation>, Error>;
    async fn slug_exists(&mut self, slug: &str, exclude_id: Option<i32>) -> Result<bool, Error>;
    async fn set_owner(&mut self, id: i32, owner_id: i32) -> Result<(), Error>;
    async fn delete(&mut self, id: i32) -> Result<(), Error>;
}

pub trait HierarchyCommon {
    /// Rows where `descendant_id` is the given organisation.
    async fn ancestor_rows(&mut self, descendant_id: i32) -> Result<Vec<HierarchyRow>, Error>;
    async fn delete_rows(&mut self, descendant_id: i32) -> Result<(), Error>;
    async fn insert_rows(&mut self, rows: &[HierarchyRow]) -> Result<(), Error>;
    async fn ancestors(&mut self, id: i32) -> Result<Vec<Related>, Error>;
    async fn descendants(&mut self, id: i32) -> Result<Vec<Related>, Error>;
    async fn is_descendant(&mut self, ancestor_id: i32, descendant_id: i32) -> Result<bool, Error>;
}

pub trait MemberCommon {
    async fn insert(&mut self, data: MemberInsert) -> Result<(), Error>;
    async fn get(&mut self, organisation_id: i32, user_id: i32) -> Result<Option<Member>, Error>;
    async fn query(&mut self, organisation_id: i32) -> Result<Vec<MemberDetail>, Error>;
    async fn update_role(&mut self, organisation_id: i32, user_id: i32, role: Role) -> Result<(), Error>;
    async fn update_permissions(&mut self, organisation_id: i32, user_id: i32, permissions: Option<Vec<String>>) -> Result<(), Error>;
    async fn activate(&mut self, organisation_id: i32, user_id: i32) -> Result<(), Error>;
    async fn delete(&mut self, organisation_id: i32, user_id: i32) -> Result<(), Error>;
    async fn organisation_ids(&mut self, user_id: i32) -> Result<Vec<i32>, Error>;
}

pub trait UserCommon {
    async fn get(&mut self, id: i32) -> Result<User, Error>;
    async fn get_by_email(&mut self, email: &str) -> Result<Option<User>, Error>;
    async fn delete(&mut self, id: i32) -> Result<(), Error>;
}

pub trait TemplateCommon {
    async fn insert(&mut self, data: TemplateInsert) -> Result<i32, Error>;
    async fn get(&mut self, id: i32) -> Result<Template, Error>;
    /// Public templates, the user's own and those shared with `organisations`.
    async fn query_usable(&mut self, user_id: i32, organisations: &[i32]) -> Result<Vec<Template>, Error>;
    async fn slug_exists(&mut self, slug: &str) -> Result<bool, Error>;
    async fn increment_use_count(&mut self, id: i32) -> Result<(), Error>;
    async fn update(&mut self, id: i32, data: TemplateUpdate) -> Result<(), Error>;
    /// Public templates and the user's own whose name or description contains `term`, ignoring case.
    async fn search(&mut self, user_id: i32, term: &str) -> Result<Vec<Template>, Error>;
    async fn upsert_rating(&mut self, template_id: i32, user_id: i32, rating: i32, review: Option<String>) -> Result<(), Error>;
    async fn ratings(&mut self, template_id: i32) -> Result<Vec<Rating>, Error>;
    async fn delete(&mut self, id: i32) -> Result<(), Error>;
}

pub trait ActivityCommon {
    async fn insert(&mut self, data: ActivityInsert) -> Result<i32, Error>;
    async fn query(&mut self, query: &ActivityQuery, pagination: Option<Pagination>) -> Result<Vec<Activity>, Error>;
    async fn count(&mut self, query: &ActivityQuery) -> Result<i64, Error>;
    /// Detaches an erased user from the activity they caused.
    async fn forget_causer(&mut self, causer_id: i32) -> Result<u64, Error>;
}

pub trait GdprCommon {
    async fn insert_audit(&mut self, data: AuditInsert) -> Result<i32, Error>;
    async fn insert_consent(&mut self, data: ConsentInsert) -> Result<i32, Error>;
    async fn consents(&mut self, user_id: i32) -> Result<Vec<ConsentLog>, Error>;
    /// Newest first, optionally limited to one data subject.
    async fn audit_logs(&mut self, user_id: Option<i32>, pagination: Option<Pagination>) -> Result<Vec<AuditLog>, Error>;
    async fn count_audit_logs(&mut self, user_id: Option<i32>) -> Result<i64, Error>;
    async fn touch_user_consent(&mut self, user_id: i32, consent_type: &str, given: bool) -> Result<(), Error>;
    async fn insert_request(&mut self, data: RequestInsert) -> Result<i32, Error>;
    async fn get_request(&mut self, id: i32) -> Result<AccessRequest, Error>;
    async fn get_request_by_token_hash(&mut self, hash: &str) -> Result<Option<AccessRequest>, Error>;
    async fn update_request(&mut self, id: i32, data: RequestUpdate) -> Result<(), Error>;
    /// Pending requests, earliest deadline first.
    async fn pending_requests(&mut self) -> Result<Vec<AccessRequest>, Error>;
    async fn insert_policy(&mut self, data: RetentionPolicyCreate, applies_from: DateTime<Utc>) -> Result<i32, Error>;
    async fn clear_default_policy(&mut self) -> Result<(), Error>;
    async fn default_policy(&mut self) -> Result<Option<RetentionPolicy>, Error>;
    async fn policies(&mut self) -> Result<Vec<RetentionPolicy>, Error>;
    async fn audit_counts(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<(String, i64)>, Error>;
    async fn consent_counts(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<(String, i64)>, Error>;
    async fn request_counts(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<(String, i64)>, Error>;
    async fn overdue_requests(&mut self, now: DateTime<Utc>) -> Result<i64, Error>;
}

pub trait Common:
    FormCommon
    + SettingsCommon
    + SectionCommon
    + FieldCommon
    + SubmissionCommon
    + SubmissionFieldCommon
    + OrganisationCommon
    + HierarchyCommon
    + MemberCommon
    + UserCommon
    + TemplateCommon
    + GdprCommon
    + ActivityCommon
{
}

pub trait Store: Common {}

pub trait TxStore: Store {
    async fn commit(self) -> Result<(), Error>;
    async fn rollback(self) -> Result<(), Error>;
}

pub trait Manager {
    type Store: Store;
    type Tx: TxStore;
    async fn db(&self) -> Result<Self::Store, Error>;
    async fn tx(&self) -> Result<Self::Tx, Error>;
}

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgQueryResult;
use sqlx::types::Json;
use sqlx::{query, query_as, query_scalar, Executor, PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::core::models::{
    activity::{Activity, Insert as ActivityInsert, Query as ActivityQuery},
    common::Pagination,
    form::{Form, Insert as FormInsert, Query as FormQuery, Update as FormUpdate},
    gdpr::{AccessRequest, AuditInsert, AuditLog, ConsentInsert, ConsentLog, RequestInsert, RequestUpdate, RetentionPolicy, RetentionPolicyCreate},
    member::{Insert as MemberInsert, Member, MemberDetail, MemberStatus, Role},
    organisation::{HierarchyRow, Insert as OrganisationInsert, Organisation, Query as OrganisationQuery, Related, Update as OrganisationUpdate},
    schema::{FieldInsert, FormField, Section, SectionInsert},
    settings::FormSettings,
    submission::{FieldInsert as AnswerInsert, Insert as SubmissionInsert, Query as SubmissionQuery, Submission, SubmissionField, SubmissionStatus, Update as SubmissionUpdate},
    template::{Insert as TemplateInsert, Rating, Template, Update as TemplateUpdate},
    user::User,
};
use crate::core::ports::repository::{
    ActivityCommon, Common, FieldCommon, FormCommon, GdprCommon, HierarchyCommon, Manager, MemberCommon, OrganisationCommon, SectionCommon, SettingsCommon, Store, SubmissionCommon,
    SubmissionFieldCommon, TemplateCommon, TxStore, UserCommon,
};
use crate::error::Error;

pub struct PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e>,
{
    executor: E,
}

impl<E> PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e>,
{
    pub fn new(executor: E) -> Self {
        Self { executor }
    }
}

/// Turns an update or delete that touched nothing into a not-found error.
fn affected(res: PgQueryResult) -> Result<(), Error> {
    if res.rows_affected() == 0 {
        return Err(Error::DatabaseError(sqlx::Error::RowNotFound));
    }
    Ok(())
}

impl<E> FormCommon for PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e, Database = Postgres>,
{
    async fn insert(&mut self, data: FormInsert) -> Result<i32, Error> {
        let id = query_scalar(
            "INSERT INTO forms (code, title, description, owner_kind, owner_id, primary_color, secondary_color)
            VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(data.code)
        .bind(data.title)
        .bind(data.description)
        .bind(data.owner.kind)
        .bind(data.owner.id)
        .bind(data.primary_color)
        .bind(data.secondary_color)
        .fetch_one(&mut self.executor)
        .await?;
        Ok(id)
    }

    async fn update(&mut self, id: i32, data: FormUpdate) -> Result<(), Error> {
        let res = query("UPDATE forms SET title = $1, description = $2, primary_color = $3, secondary_color = $4, updated_at = NOW() WHERE id = $5")
            .bind(data.title)
            .bind(data.description)
            .bind(data.primary_color)
            .bind(data.secondary_color)
            .bind(id)
            .execute(&mut self.executor)
            .await?;
        affected(res)
    }

    async fn get(&mut self, id: i32) -> Result<Form, Error> {
        let form = query_as("SELECT * FROM forms WHERE id = $1").bind(id).fetch_one(&mut self.executor).await?;
        Ok(form)
    }

    async fn get_by_code(&mut self, code: Uuid) -> Result<Form, Error> {
        let form = query_as("SELECT * FROM forms WHERE code = $1").bind(code).fetch_one(&mut self.executor).await?;
        Ok(form)
    }

    async fn query(&mut self, query: &FormQuery, pagination: Option<Pagination>) -> Result<Vec<Form>, Error> {
        let mut stmt = QueryBuilder::new("SELECT * FROM forms WHERE 1 = 1");
        if let Some(owner) = query.owner_eq {
            stmt.push(" AND owner_kind = ").push_bind(owner.kind);
            stmt.push(" AND owner_id = ").push_bind(owner.id);
        }
        stmt.push(" ORDER BY id DESC");
        if let Some(p) = pagination {
            stmt.push(" LIMIT ").push_bind(p.limit);
            stmt.push(" OFFSET ").push_bind(p.offset);
        }
        let forms = stmt.build_query_as().fetch_all(&mut self.executor).await?;
        Ok(forms)
    }

    async fn count(&mut self, query: &FormQuery) -> Result<i64, Error> {
        let mut stmt = QueryBuilder::new("SELECT COUNT(*) FROM forms WHERE 1 = 1");
        if let Some(owner) = query.owner_eq {
            stmt.push(" AND owner_kind = ").push_bind(owner.kind);
            stmt.push(" AND owner_id = ").push_bind(owner.id);
        }
        let (n,) = stmt.build_query_as().fetch_one(&mut self.executor).await?;
        Ok(n)
    }

    async fn delete(&mut self, id: i32) -> Result<(), Error> {
        let res = query("DELETE FROM forms WHERE id = $1").bind(id).execute(&mut self.executor).await?;
        affected(res)
    }
}

impl<E> SettingsCommon for PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e, Database = Postgres>,
{
    async fn get(&mut self, form_id: i32) -> Result<Option<FormSettings>, Error> {
        let settings = query_as("SELECT * FROM form_settings WHERE form_id = $1")
            .bind(form_id)
            .fetch_optional(&mut self.executor)
            .await?;
        Ok(settings)
    }

    async fn upsert(&mut self, settings: &FormSettings) -> Result<(), Error> {
        query(
            "INSERT INTO form_settings (form_id, publish_mode, is_published, open_at, close_at, max_submissions, sharing_type,
                allow_duplicate_responses, allow_response_editing, confirmation_email, confirmation_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (form_id) DO UPDATE SET
                publish_mode = EXCLUDED.publish_mode,
                is_published = EXCLUDED.is_published,
                open_at = EXCLUDED.open_at,
                close_at = EXCLUDED.close_at,
                max_submissions = EXCLUDED.max_submissions,
                sharing_type = EXCLUDED.sharing_type,
                allow_duplicate_responses = EXCLUDED.allow_duplicate_responses,
                allow_response_editing = EXCLUDED.allow_response_editing,
                confirmation_email = EXCLUDED.confirmation_email,
                confirmation_message = EXCLUDED.confirmation_message",
        )
        .bind(settings.form_id)
        .bind(settings.publish_mode)
        .bind(settings.is_published)
        .bind(settings.open_at)
        .bind(settings.close_at)
        .bind(settings.max_submissions)
        .bind(settings.sharing_type)
        .bind(settings.allow_duplicate_responses)
        .bind(settings.allow_response_editing)
        .bind(settings.confirmation_email)
        .bind(&settings.confirmation_message)
        .execute(&mut self.executor)
        .await?;
        Ok(())
    }
}

impl<E> SectionCommon for PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e, Database = Postgres>,
{
    async fn insert(&mut self, data: SectionInsert) -> Result<i32, Error> {
        let id = query_scalar("INSERT INTO form_sections (form_id, title, description, section_order) VALUES ($1, $2, $3, $4) RETURNING id")
            .bind(data.form_id)
            .bind(data.title)
            .bind(data.description)
            .bind(data.section_order)
            .fetch_one(&mut self.executor)
            .await?;
        Ok(id)
    }

    async fn update(&mut self, id: i32, data: SectionInsert) -> Result<(), Error> {
        let res = query("UPDATE form_sections SET title = $1, description = $2, section_order = $3 WHERE id = $4 AND form_id = $5")
            .bind(data.title)
            .bind(data.description)
            .bind(data.section_order)
            .bind(id)
            .bind(data.form_id)
            .execute(&mut self.executor)
            .await?;
        affected(res)
    }

    async fn query(&mut self, form_id: i32) -> Result<Vec<Section>, Error> {
        let sections = query_as("SELECT * FROM form_sections WHERE form_id = $1 ORDER BY section_order, id")
            .bind(form_id)
            .fetch_all(&mut self.executor)
            .await?;
        Ok(sections)
    }

    async fn delete_except(&mut self, form_id: i32, keep: &[i32]) -> Result<u64, Error> {
        let res = query("DELETE FROM form_sections WHERE form_id = $1 AND NOT (id = ANY($2))")
            .bind(form_id)
            .bind(keep)
            .execute(&mut self.executor)
            .await?;
        Ok(res.rows_affected())
    }
}

impl<E> FieldCommon for PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e, Database = Postgres>,
{
    async fn insert(&mut self, data: FieldInsert) -> Result<i32, Error> {
        let id = query_scalar(
            "INSERT INTO form_fields (form_id, section_id, label, field_type, options, required, field_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(data.form_id)
        .bind(data.section_id)
        .bind(data.label)
        .bind(data.field_type)
        .bind(data.options)
        .bind(data.required)
        .bind(data.field_order)
        .fetch_one(&mut self.executor)
        .await?;
        Ok(id)
    }

    async fn update(&mut self, id: i32, data: FieldInsert) -> Result<(), Error> {
        let res = query(
            "UPDATE form_fields SET section_id = $1, label = $2, field_type = $3, options = $4, required = $5, field_order = $6
            WHERE id = $7 AND form_id = $8",
        )
        .bind(data.section_id)
        .bind(data.label)
        .bind(data.field_type)
        .bind(data.options)
        .bind(data.required)
        .bind(data.field_order)
        .bind(id)
        .bind(data.form_id)
        .execute(&mut self.executor)
        .await?;
        affected(res)
    }

    async fn query(&mut self, form_id: i32) -> Result<Vec<FormField>, Error> {
        let fields = query_as("SELECT * FROM form_fields WHERE form_id = $1 ORDER BY section_id, field_order, id")
            .bind(form_id)
            .fetch_all(&mut self.executor)
            .await?;
        Ok(fields)
    }

    async fn delete_except(&mut self, form_id: i32, keep: &[i32]) -> Result<u64, Error> {
        let res = query("DELETE FROM form_fields WHERE form_id = $1 AND NOT (id = ANY($2))")
            .bind(form_id)
            .bind(keep)
            .execute(&mut self.executor)
            .await?;
        Ok(res.rows_affected())
    }
}

fn push_submission_filters(stmt: &mut QueryBuilder<Postgres>, query: &SubmissionQuery) {
    if let Some(form_id) = query.form_id_eq {
        stmt.push(" AND form_id = ").push_bind(form_id);
    }
    if let Some(user_id) = query.user_id_eq {
        stmt.push(" AND user_id = ").push_bind(user_id);
    }
    if query.exclude_drafts {
        stmt.push(" AND status <> ").push_bind(SubmissionStatus::Draft);
    }
}

impl<E> SubmissionCommon for PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e, Database = Postgres>,
{
    async fn insert(&mut self, data: SubmissionInsert) -> Result<i32, Error> {
        let id = query_scalar("INSERT INTO submissions (code, form_id, user_id, status, retention_until) VALUES ($1, $2, $3, $4, $5) RETURNING id")
            .bind(data.code)
            .bind(data.form_id)
            .bind(data.user_id)
            .bind(data.status)
            .bind(data.retention_until)
            .fetch_one(&mut self.executor)
            .await?;
        Ok(id)
    }

    async fn update(&mut self, id: i32, data: SubmissionUpdate) -> Result<(), Error> {
        let res = query("UPDATE submissions SET email = $1, guest_name = $2, status = $3, updated_at = NOW() WHERE id = $4")
            .bind(data.email)
            .bind(data.guest_name)
            .bind(data.status)
            .bind(id)
            .execute(&mut self.executor)
            .await?;
        affected(res)
    }

    async fn set_status(&mut self, id: i32, status: SubmissionStatus) -> Result<(), Error> {
        let res = query("UPDATE submissions SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(&mut self.executor)
            .await?;
        affected(res)
    }

    async fn get(&mut self, id: i32) -> Result<Submission, Error> {
        let submission = query_as("SELECT * FROM submissions WHERE id = $1").bind(id).fetch_one(&mut self.executor).await?;
        Ok(submission)
    }

    async fn get_by_code(&mut self, code: Uuid) -> Result<Submission, Error> {
        let submission = query_as("SELECT * FROM submissions WHERE code = $1").bind(code).fetch_one(&mut self.executor).await?;
        Ok(submission)
    }

    async fn query(&mut self, query: &SubmissionQuery, pagination: Option<Pagination>) -> Result<Vec<Submission>, Error> {
        let mut stmt = QueryBuilder::new("SELECT * FROM submissions WHERE 1 = 1");
        push_submission_filters(&mut stmt, query);
        stmt.push(" ORDER BY id DESC");
        if let Some(p) = pagination {
            stmt.push(" LIMIT ").push_bind(p.limit);
            stmt.push(" OFFSET ").push_bind(p.offset);
        }
        let submissions = stmt.build_query_as().fetch_all(&mut self.executor).await?;
        Ok(submissions)
    }

    async fn count(&mut self, query: &SubmissionQuery) -> Result<i64, Error> {
        let mut stmt = QueryBuilder::new("SELECT COUNT(*) FROM submissions WHERE 1 = 1");
        push_submission_filters(&mut stmt, query);
        let (n,) = stmt.build_query_as().fetch_one(&mut self.executor).await?;
        Ok(n)
    }

    async fn email_taken(&mut self, form_id: i32, email: &str, exclude_id: i32) -> Result<bool, Error> {
        let taken = query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM submissions
                WHERE form_id = $1 AND id <> $2 AND status <> $3 AND LOWER(email) = LOWER($4))",
        )
        .bind(form_id)
        .bind(exclude_id)
        .bind(SubmissionStatus::Draft)
        .bind(email)
        .fetch_one(&mut self.executor)
        .await?;
        Ok(taken)
    }

    async fn expired(&mut self, before: DateTime<Utc>) -> Result<Vec<Submission>, Error> {
        let submissions = query_as("SELECT * FROM submissions WHERE retention_until < $1 ORDER BY id")
            .bind(before)
            .fetch_all(&mut self.executor)
            .await?;
        Ok(submissions)
    }

    async fn delete(&mut self, ids: &[i32]) -> Result<u64, Error> {
        let res = query("DELETE FROM submissions WHERE id = ANY($1)").bind(ids).execute(&mut self.executor).await?;
        Ok(res.rows_affected())
    }
}

impl<E> SubmissionFieldCommon for PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e, Database = Postgres>,
{
    async fn bulk_insert(&mut self, answers: Vec<AnswerInsert>) -> Result<(), Error> {
        if answers.is_empty() {
            return Ok(());
        }
        let mut stmt = QueryBuilder::new("INSERT INTO submission_fields (submission_id, form_field_id, answer) ");
        stmt.push_values(answers, |mut row, a| {
            row.push_bind(a.submission_id).push_bind(a.form_field_id).push_bind(a.answer.map(Json));
        });
        stmt.build().execute(&mut self.executor).await?;
        Ok(())
    }

    async fn query(&mut self, submission_id: i32) -> Result<Vec<SubmissionField>, Error> {
        let fields = query_as("SELECT * FROM submission_fields WHERE submission_id = $1 ORDER BY id")
            .bind(submission_id)
            .fetch_all(&mut self.executor)
            .await?;
        Ok(fields)
    }

    async fn upsert(&mut self, answer: AnswerInsert) -> Result<(), Error> {
        query(
            "INSERT INTO submission_fields (submission_id, form_field_id, answer) VALUES ($1, $2, $3)
            ON CONFLICT (submission_id, form_field_id) DO UPDATE SET answer = EXCLUDED.answer",
        )
        .bind(answer.submission_id)
        .bind(answer.form_field_id)
        .bind(answer.answer.map(Json))
        .execute(&mut self.executor)
        .await?;
        Ok(())
    }

    async fn delete_by_submissions(&mut self, submission_ids: &[i32]) -> Result<u64, Error> {
        let res = query("DELETE FROM submission_fields WHERE submission_id = ANY($1)")
            .bind(submission_ids)
            .execute(&mut self.executor)
            .await?;
        Ok(res.rows_affected())
    }
}

impl<E> OrganisationCommon for PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e, Database = Postgres>,
{
    async fn insert(&mut self, data: OrganisationInsert) -> Result<i32, Error> {
        let id = query_scalar("INSERT INTO organisations (name, slug, short_name, owner_id, parent_id, org_type) VALUES ($1, $2, $3, $4, $5, $6) RETURNING id")
            .bind(data.name)
            .bind(data.slug)
            .bind(data.short_name)
            .bind(data.owner_id)
            .bind(data.parent_id)
            .bind(data.org_type)
            .fetch_one(&mut self.executor)
            .await?;
        Ok(id)
    }

    async fn update(&mut self, id: i32, data: OrganisationUpdate) -> Result<(), Error> {
        let res = query(
            "UPDATE organisations SET name = $1, slug = $2, short_name = $3, parent_id = $4, org_type = $5,
                allow_member_form_creation = $6, require_form_approval = $7, updated_at = NOW()
            WHERE id = $8",
        )
        .bind(data.name)
        .bind(data.slug)
        .bind(data.short_name)
        .bind(data.parent_id)
        .bind(data.org_type)
        .bind(data.allow_member_form_creation)
        .bind(data.require_form_approval)
        .bind(id)
        .execute(&mut self.executor)
        .await?;
        affected(res)
    }

    async fn get(&mut self, id: i32) -> Result<Organisation, Error> {
        let org = query_as("SELECT * FROM organisations WHERE id = $1").bind(id).fetch_one(&mut self.executor).await?;
        Ok(org)
    }

    async fn query(&mut self, query: &OrganisationQuery) -> Result<Vec<Organisation>, Error> {
        let mut stmt = QueryBuilder::new("SELECT * FROM organisations WHERE 1 = 1");
        if let Some(uid) = query.member_id {
            stmt.push(" AND id IN (SELECT organisation_id FROM organisation_members WHERE user_id = ")
                .push_bind(uid)
                .push(")");
        }
        if let Some(parent_id) = query.parent_id_eq {
            stmt.push(" AND parent_id = ").push_bind(parent_id);
        }
        stmt.push(" ORDER BY id");
        let orgs = stmt.build_query_as().fetch_all(&mut self.executor).await?;
        Ok(orgs)
    }

    async fn slug_exists(&mut self, slug: &str, exclude_id: Option<i32>) -> Result<bool, Error> {
        let exists = query_scalar("SELECT EXISTS(SELECT * FROM organisations WHERE slug = $1 AND ($2::INT IS NULL OR id <> $2))")
            .bind(slug)
            .bind(exclude_id)
            .fetch_one(&mut self.executor)
            .await?;
        Ok(exists)
    }

    async fn set_owner(&mut self, id: i32, owner_id: i32) -> Result<(), Error> {
        let res = query("UPDATE organisations SET owner_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(owner_id)
            .bind(id)
            .execute(&mut self.executor)
            .await?;
        affected(res)
    }

    async fn delete(&mut self, id: i32) -> Result<(), Error> {
        let res = query("DELETE FROM organisations WHERE id = $1").bind(id).execute(&mut self.executor).await?;
        affected(res)
    }
}

impl<E> HierarchyCommon for PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e, Database = Postgres>,
{
    async fn ancestor_rows(&mut self, descendant_id: i32) -> Result<Vec<HierarchyRow>, Error> {
        let rows = query_as("SELECT * FROM organisation_hierarchy WHERE descendant_id = $1 ORDER BY depth")
            .bind(descendant_id)
            .fetch_all(&mut self.executor)
            .await?;
        Ok(rows)
    }

    async fn delete_rows(&mut self, descendant_id: i32) -> Result<(), Error> {
        query("DELETE FROM organisation_hierarchy WHERE descendant_id = $1")
            .bind(descendant_id)
            .execute(&mut self.executor)
            .await?;
        Ok(())
    }

    async fn insert_rows(&mut self, rows: &[HierarchyRow]) -> Result<(), Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = QueryBuilder::new("INSERT INTO organisation_hierarchy (ancestor_id, descendant_id, depth) ");
        stmt.push_values(rows, |mut row, r| {
            row.push_bind(r.ancestor_id).push_bind(r.descendant_id).push_bind(r.depth);
        });
        stmt.build().execute(&mut self.executor).await?;
        Ok(())
    }

    async fn ancestors(&mut self, id: i32) -> Result<Vec<Related>, Error> {
        let orgs = query_as(
            "SELECT o.*, h.depth FROM organisation_hierarchy AS h
            JOIN organisations AS o ON o.id = h.ancestor_id
            WHERE h.descendant_id = $1 AND h.depth > 0
            ORDER BY h.depth",
        )
        .bind(id)
        .fetch_all(&mut self.executor)
        .await?;
        Ok(orgs)
    }

    async fn descendants(&mut self, id: i32) -> Result<Vec<Related>, Error> {
        let orgs = query_as(
            "SELECT o.*, h.depth FROM organisation_hierarchy AS h
            JOIN organisations AS o ON o.id = h.descendant_id
            WHERE h.ancestor_id = $1 AND h.depth > 0
            ORDER BY h.depth, o.id",
        )
        .bind(id)
        .fetch_all(&mut self.executor)
        .await?;
        Ok(orgs)
    }

    async fn is_descendant(&mut self, ancestor_id: i32, descendant_id: i32) -> Result<bool, Error> {
        let res = query_scalar("SELECT EXISTS(SELECT * FROM organisation_hierarchy WHERE ancestor_id = $1 AND descendant_id = $2 AND depth > 0)")
            .bind(ancestor_id)
            .bind(descendant_id)
            .fetch_one(&mut self.executor)
            .await?;
        Ok(res)
    }
}

impl<E> MemberCommon for PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e, Database = Postgres>,
{
    async fn insert(&mut self, data: MemberInsert) -> Result<(), Error> {
        let joined_at = (data.status == MemberStatus::Active).then(Utc::now);
        query(
            "INSERT INTO organisation_members (organisation_id, user_id, role, permissions, status, invited_by, invited_at, joined_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), $7)",
        )
        .bind(data.organisation_id)
        .bind(data.user_id)
        .bind(data.role)
        .bind(data.permissions)
        .bind(data.status)
        .bind(data.invited_by)
        .bind(joined_at)
        .execute(&mut self.executor)
        .await?;
        Ok(())
    }

    async fn get(&mut self, organisation_id: i32, user_id: i32) -> Result<Option<Member>, Error> {
        let member = query_as("SELECT * FROM organisation_members WHERE organisation_id = $1 AND user_id = $2")
            .bind(organisation_id)
            .bind(user_id)
            .fetch_optional(&mut self.executor)
            .await?;
        Ok(member)
    }

    async fn query(&mut self, organisation_id: i32) -> Result<Vec<MemberDetail>, Error> {
        let members = query_as(
            "SELECT u.id, u.name, u.email, m.role, m.permissions, m.status, m.invited_at, m.joined_at
            FROM organisation_members AS m
            JOIN users AS u ON u.id = m.user_id
            WHERE m.organisation_id = $1
            ORDER BY m.role, u.name",
        )
        .bind(organisation_id)
        .fetch_all(&mut self.executor)
        .await?;
        Ok(members)
    }

    async fn update_role(&mut self, organisation_id: i32, user_id: i32, role: Role) -> Result<(), Error> {
        let res = query("UPDATE organisation_members SET role = $1 WHERE organisation_id = $2 AND user_id = $3")
            .bind(role)
            .bind(organisation_id)
            .bind(user_id)
            .execute(&mut self.executor)
            .await?;
        affected(res)
    }

    async fn update_permissions(&mut self, organisation_id: i32, user_id: i32, permissions: Option<Vec<String>>) -> Result<(), Error> {
        let res = query("UPDATE organisation_members SET permissions = $1 WHERE organisation_id = $2 AND user_id = $3")
            .bind(permissions)
            .bind(organisation_id)
            .bind(user_id)
            .execute(&mut self.executor)
            .await?;
        affected(res)
    }

    async fn activate(&mut self, organisation_id: i32, user_id: i32) -> Result<(), Error> {
        let res = query("UPDATE organisation_members SET status = $1, joined_at = NOW() WHERE organisation_id = $2 AND user_id = $3")
            .bind(MemberStatus::Active)
            .bind(organisation_id)
            .bind(user_id)
            .execute(&mut self.executor)
            .await?;
        affected(res)
    }

    async fn delete(&mut self, organisation_id: i32, user_id: i32) -> Result<(), Error> {
        query("DELETE FROM organisation_members WHERE organisation_id = $1 AND user_id = $2")
            .bind(organisation_id)
            .bind(user_id)
            .execute(&mut self.executor)
            .await?;
        Ok(())
    }

    async fn organisation_ids(&mut self, user_id: i32) -> Result<Vec<i32>, Error> {
        let ids = query_scalar("SELECT organisation_id FROM organisation_members WHERE user_id = $1 AND status = $2")
            .bind(user_id)
            .bind(MemberStatus::Active)
            .fetch_all(&mut self.executor)
            .await?;
        Ok(ids)
    }
}

impl<E> UserCommon for PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e, Database = Postgres>,
{
    async fn get(&mut self, id: i32) -> Result<User, Error> {
        let user = query_as("SELECT * FROM users WHERE id = $1").bind(id).fetch_one(&mut self.executor).await?;
        Ok(user)
    }

    async fn get_by_email(&mut self, email: &str) -> Result<Option<User>, Error> {
        let user = query_as("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&mut self.executor)
            .await?;
        Ok(user)
    }

    async fn delete(&mut self, id: i32) -> Result<(), Error> {
        let res = query("DELETE FROM users WHERE id = $1").bind(id).execute(&mut self.executor).await?;
        affected(res)
    }
}

impl<E> TemplateCommon for PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e, Database = Postgres>,
{
    async fn insert(&mut self, data: TemplateInsert) -> Result<i32, Error> {
        let id = query_scalar(
            "INSERT INTO templates (name, slug, description, owner_kind, owner_id, visibility, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(data.name)
        .bind(data.slug)
        .bind(data.description)
        .bind(data.owner.kind)
        .bind(data.owner.id)
        .bind(data.visibility)
        .bind(Json(data.data))
        .fetch_one(&mut self.executor)
        .await?;
        Ok(id)
    }

    async fn get(&mut self, id: i32) -> Result<Template, Error> {
        let template = query_as("SELECT * FROM templates WHERE id = $1").bind(id).fetch_one(&mut self.executor).await?;
        Ok(template)
    }

    async fn query_usable(&mut self, user_id: i32, organisations: &[i32]) -> Result<Vec<Template>, Error> {
        let templates = query_as(
            "SELECT * FROM templates
            WHERE (owner_kind = 'user' AND owner_id = $1)
                OR visibility = 'public'
                OR (visibility = 'organisation' AND owner_kind = 'organisation' AND owner_id = ANY($2))
            ORDER BY use_count DESC, id",
        )
        .bind(user_id)
        .bind(organisations)
        .fetch_all(&mut self.executor)
        .await?;
        Ok(templates)
    }

    async fn slug_exists(&mut self, slug: &str) -> Result<bool, Error> {
        let exists = query_scalar("SELECT EXISTS(SELECT * FROM templates WHERE slug = $1)")
            .bind(slug)
            .fetch_one(&mut self.executor)
            .await?;
        Ok(exists)
    }

    async fn increment_use_count(&mut self, id: i32) -> Result<(), Error> {
        let res = query("UPDATE templates SET use_count = use_count + 1 WHERE id = $1").bind(id).execute(&mut self.executor).await?;
        affected(res)
    }

    async fn update(&mut self, id: i32, data: TemplateUpdate) -> Result<(), Error> {
        let res = query("UPDATE templates SET name = $1, description = $2, visibility = $3, updated_at = now() WHERE id = $4")
            .bind(data.name)
            .bind(data.description)
            .bind(data.visibility)
            .bind(id)
            .execute(&mut self.executor)
            .await?;
        affected(res)
    }

    async fn search(&mut self, user_id: i32, term: &str) -> Result<Vec<Template>, Error> {
        let pattern = format!("%{}%", term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_"));
        let templates = query_as(
            "SELECT * FROM templates
            WHERE (visibility = 'public' OR (owner_kind = 'user' AND owner_id = $1))
                AND (name ILIKE $2 OR description ILIKE $2)
            ORDER BY use_count DESC, id",
        )
        .bind(user_id)
        .bind(pattern)
        .fetch_all(&mut self.executor)
        .await?;
        Ok(templates)
    }

    async fn upsert_rating(&mut self, template_id: i32, user_id: i32, rating: i32, review: Option<String>) -> Result<(), Error> {
        query(
            "INSERT INTO template_ratings (template_id, user_id, rating, review) VALUES ($1, $2, $3, $4)
            ON CONFLICT (template_id, user_id) DO UPDATE SET rating = EXCLUDED.rating, review = EXCLUDED.review, updated_at = now()",
        )
        .bind(template_id)
        .bind(user_id)
        .bind(rating)
        .bind(review)
        .execute(&mut self.executor)
        .await?;
        Ok(())
    }

    async fn ratings(&mut self, template_id: i32) -> Result<Vec<Rating>, Error> {
        let ratings = query_as("SELECT * FROM template_ratings WHERE template_id = $1 ORDER BY updated_at DESC")
            .bind(template_id)
            .fetch_all(&mut self.executor)
            .await?;
        Ok(ratings)
    }

    async fn delete(&mut self, id: i32) -> Result<(), Error> {
        let res = query("DELETE FROM templates WHERE id = $1").bind(id).execute(&mut self.executor).await?;
        affected(res)
    }
}

impl<E> GdprCommon for PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e, Database = Postgres>,
{
    async fn insert_audit(&mut self, data: AuditInsert) -> Result<i32, Error> {
        let id = query_scalar(
            "INSERT INTO gdpr_audit_logs (action, entity_type, entity_id, user_id, actor_type, reason, data_summary, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING id",
        )
        .bind(data.action)
        .bind(data.entity_type)
        .bind(data.entity_id)
        .bind(data.user_id)
        .bind(data.actor_type)
        .bind(data.reason)
        .bind(data.data_summary.map(Json))
        .bind(data.ip_address)
        .bind(data.user_agent)
        .fetch_one(&mut self.executor)
        .await?;
        Ok(id)
    }

    async fn insert_consent(&mut self, data: ConsentInsert) -> Result<i32, Error> {
        let id = query_scalar(
            "INSERT INTO consent_logs (user_id, consent_type, given, version, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(data.user_id)
        .bind(data.consent_type)
        .bind(data.given)
        .bind(data.version)
        .bind(data.ip_address)
        .bind(data.user_agent)
        .fetch_one(&mut self.executor)
        .await?;
        Ok(id)
    }

    async fn consents(&mut self, user_id: i32) -> Result<Vec<ConsentLog>, Error> {
        let consents = query_as("SELECT * FROM consent_logs WHERE user_id = $1 ORDER BY created_at, id")
            .bind(user_id)
            .fetch_all(&mut self.executor)
            .await?;
        Ok(consents)
    }

    async fn audit_logs(&mut self, user_id: Option<i32>, pagination: Option<Pagination>) -> Result<Vec<AuditLog>, Error> {
        let mut stmt = QueryBuilder::new("SELECT * FROM gdpr_audit_logs WHERE 1 = 1");
        if let Some(user_id) = user_id {
            stmt.push(" AND user_id = ").push_bind(user_id);
        }
        stmt.push(" ORDER BY id DESC");
        if let Some(p) = pagination {
            stmt.push(" LIMIT ").push_bind(p.limit);
            stmt.push(" OFFSET ").push_bind(p.offset);
        }
        let logs = stmt.build_query_as().fetch_all(&mut self.executor).await?;
        Ok(logs)
    }

    async fn count_audit_logs(&mut self, user_id: Option<i32>) -> Result<i64, Error> {
        let mut stmt = QueryBuilder::new("SELECT COUNT(*) FROM gdpr_audit_logs WHERE 1 = 1");
        if let Some(user_id) = user_id {
            stmt.push(" AND user_id = ").push_bind(user_id);
        }
        let (n,) = stmt.build_query_as().fetch_one(&mut self.executor).await?;
        Ok(n)
    }

    async fn touch_user_consent(&mut self, user_id: i32, consent_type: &str, given: bool) -> Result<(), Error> {
        let stmt = match consent_type {
            "gdpr" => "UPDATE users SET consent_gdpr_at = CASE WHEN $1 THEN NOW() END, updated_at = NOW() WHERE id = $2",
            "marketing_email" => "UPDATE users SET consent_marketing_at = CASE WHEN $1 THEN NOW() END, updated_at = NOW() WHERE id = $2",
            _ => return Ok(()),
        };
        let res = query(stmt).bind(given).bind(user_id).execute(&mut self.executor).await?;
        affected(res)
    }

    async fn insert_request(&mut self, data: RequestInsert) -> Result<i32, Error> {
        let id = query_scalar("INSERT INTO dsar_requests (user_id, request_type, reason, requested_at, deadline_at) VALUES ($1, $2, $3, $4, $5) RETURNING id")
            .bind(data.user_id)
            .bind(data.request_type)
            .bind(data.reason)
            .bind(data.requested_at)
            .bind(data.deadline_at)
            .fetch_one(&mut self.executor)
            .await?;
        Ok(id)
    }

    async fn get_request(&mut self, id: i32) -> Result<AccessRequest, Error> {
        let request = query_as("SELECT * FROM dsar_requests WHERE id = $1").bind(id).fetch_one(&mut self.executor).await?;
        Ok(request)
    }

    async fn get_request_by_token_hash(&mut self, hash: &str) -> Result<Option<AccessRequest>, Error> {
        let request = query_as("SELECT * FROM dsar_requests WHERE download_token_hash = $1")
            .bind(hash)
            .fetch_optional(&mut self.executor)
            .await?;
        Ok(request)
    }

    async fn update_request(&mut self, id: i32, data: RequestUpdate) -> Result<(), Error> {
        let res = match data {
            RequestUpdate::Complete {
                completed_at,
                token_hash,
                token_expires_at,
                response_data,
            } => {
                query(
                    "UPDATE dsar_requests SET status = 'completed', completed_at = $1, download_token_hash = $2, token_expires_at = $3, response_data = $4
                    WHERE id = $5",
                )
                .bind(completed_at)
                .bind(token_hash)
                .bind(token_expires_at)
                .bind(Json::<Value>(response_data))
                .bind(id)
                .execute(&mut self.executor)
                .await?
            }
            RequestUpdate::Reject { completed_at, reason } => {
                query("UPDATE dsar_requests SET status = 'rejected', completed_at = $1, rejection_reason = $2 WHERE id = $3")
                    .bind(completed_at)
                    .bind(reason)
                    .bind(id)
                    .execute(&mut self.executor)
                    .await?
            }
        };
        affected(res)
    }

    async fn pending_requests(&mut self) -> Result<Vec<AccessRequest>, Error> {
        let requests = query_as("SELECT * FROM dsar_requests WHERE status = 'pending' ORDER BY deadline_at, id")
            .fetch_all(&mut self.executor)
            .await?;
        Ok(requests)
    }

    async fn insert_policy(&mut self, data: RetentionPolicyCreate, applies_from: DateTime<Utc>) -> Result<i32, Error> {
        let id = query_scalar(
            "INSERT INTO data_retention_policies (name, retention_days, description, is_default, applies_from)
            VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(data.name)
        .bind(data.retention_days)
        .bind(data.description)
        .bind(data.is_default)
        .bind(applies_from)
        .fetch_one(&mut self.executor)
        .await?;
        Ok(id)
    }

    async fn clear_default_policy(&mut self) -> Result<(), Error> {
        query("UPDATE data_retention_policies SET is_default = FALSE WHERE is_default").execute(&mut self.executor).await?;
        Ok(())
    }

    async fn default_policy(&mut self) -> Result<Option<RetentionPolicy>, Error> {
        let policy = query_as("SELECT * FROM data_retention_policies WHERE is_default ORDER BY id DESC LIMIT 1")
            .fetch_optional(&mut self.executor)
            .await?;
        Ok(policy)
    }

    async fn policies(&mut self) -> Result<Vec<RetentionPolicy>, Error> {
        let policies = query_as("SELECT * FROM data_retention_policies ORDER BY id").fetch_all(&mut self.executor).await?;
        Ok(policies)
    }

    async fn audit_counts(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<(String, i64)>, Error> {
        let counts = query_as("SELECT action::TEXT, COUNT(*) FROM gdpr_audit_logs WHERE created_at BETWEEN $1 AND $2 GROUP BY action ORDER BY action")
            .bind(from)
            .bind(to)
            .fetch_all(&mut self.executor)
            .await?;
        Ok(counts)
    }

    async fn consent_counts(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<(String, i64)>, Error> {
        let counts = query_as("SELECT consent_type, COUNT(*) FROM consent_logs WHERE created_at BETWEEN $1 AND $2 GROUP BY consent_type ORDER BY consent_type")
            .bind(from)
            .bind(to)
            .fetch_all(&mut self.executor)
            .await?;
        Ok(counts)
    }

    async fn request_counts(&mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<(String, i64)>, Error> {
        let counts = query_as("SELECT status::TEXT, COUNT(*) FROM dsar_requests WHERE requested_at BETWEEN $1 AND $2 GROUP BY status ORDER BY status")
            .bind(from)
            .bind(to)
            .fetch_all(&mut self.executor)
            .await?;
        Ok(counts)
    }

    async fn overdue_requests(&mut self, now: DateTime<Utc>) -> Result<i64, Error> {
        let n = query_scalar("SELECT COUNT(*) FROM dsar_requests WHERE status IN ('pending', 'processing') AND deadline_at < $1")
            .bind(now)
            .fetch_one(&mut self.executor)
            .await?;
        Ok(n)
    }
}

fn push_activity_filters(stmt: &mut QueryBuilder<Postgres>, query: &ActivityQuery) {
    if let Some(subject_type) = query.subject_type_eq {
        stmt.push(" AND subject_type = ").push_bind(subject_type);
    }
    if let Some(subject_id) = query.subject_id_eq {
        stmt.push(" AND subject_id = ").push_bind(subject_id);
    }
    if let Some(causer_id) = query.causer_id_eq {
        stmt.push(" AND causer_id = ").push_bind(causer_id);
    }
}

impl<E> ActivityCommon for PgSqlx<E>
where
    for<'e> &'e mut E: Executor<'e, Database = Postgres>,
{
    async fn insert(&mut self, data: ActivityInsert) -> Result<i32, Error> {
        let id = query_scalar(
            "INSERT INTO activity_logs (log_name, subject_type, subject_id, event, causer_id, properties)
            VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(data.log_name)
        .bind(data.subject_type)
        .bind(data.subject_id)
        .bind(data.event.as_str())
        .bind(data.causer_id)
        .bind(Json(data.properties))
        .fetch_one(&mut self.executor)
        .await?;
        Ok(id)
    }

    async fn query(&mut self, query: &ActivityQuery, pagination: Option<Pagination>) -> Result<Vec<Activity>, Error> {
        let mut stmt = QueryBuilder::new("SELECT * FROM activity_logs WHERE 1 = 1");
        push_activity_filters(&mut stmt, query);
        stmt.push(" ORDER BY id DESC");
        if let Some(p) = pagination {
            stmt.push(" LIMIT ").push_bind(p.limit);
            stmt.push(" OFFSET ").push_bind(p.offset);
        }
        let activities = stmt.build_query_as().fetch_all(&mut self.executor).await?;
        Ok(activities)
    }

    async fn count(&mut self, query: &ActivityQuery) -> Result<i64, Error> {
        let mut stmt = QueryBuilder::new("SELECT COUNT(*) FROM activity_logs WHERE 1 = 1");
        push_activity_filters(&mut stmt, query);
        let (n,) = stmt.build_query_as().fetch_one(&mut self.executor).await?;
        Ok(n)
    }

    async fn forget_causer(&mut self, causer_id: i32) -> Result<u64, Error> {
        let res = query("UPDATE activity_logs SET causer_id = NULL WHERE causer_id = $1")
            .bind(causer_id)
            .execute(&mut self.executor)
            .await?;
        Ok(res.rows_affected())
    }
}

impl Common for PgSqlx<PoolConnection<Postgres>> {}
impl Common for PgSqlx<Transaction<'static, Postgres>> {}
impl Store for PgSqlx<PoolConnection<Postgres>> {}
impl Store for PgSqlx<Transaction<'static, Postgres>> {}

impl TxStore for PgSqlx<Transaction<'static, Postgres>> {
    async fn commit(self) -> Result<(), Error> {
        self.executor.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), Error> {
        self.executor.rollback().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgSqlxManager {
    pool: PgPool,
}

impl PgSqlxManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl Manager for PgSqlxManager {
    type Store = PgSqlx<PoolConnection<Postgres>>;
    type Tx = PgSqlx<Transaction<'static, Postgres>>;

    async fn db(&self) -> Result<Self::Store, Error> {
        let conn = self.pool.acquire().await?;
        Ok(PgSqlx::new(conn))
    }

    async fn tx(&self) -> Result<Self::Tx, Error> {
        let tx = self.pool.begin().await?;
        Ok(PgSqlx::new(tx))
    }
}

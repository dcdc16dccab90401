use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::core::models::{
    common::Pagination,
    form::{Form, FormCreate, FormStatus, FormUpdate, FormView, Insert as FormInsert, Owner, Query as FormQuery, Update as FormUpdateRow},
    schema::{group_sections, SectionWithFields},
    settings::{FormSettings, SharingType},
    submission::Query as SubmissionQuery,
};
use crate::core::permission::{Permission, RoleGrants};
use crate::core::ports::repository::{FieldCommon, FormCommon, SectionCommon, SettingsCommon, Store, SubmissionCommon, TxStore};
use crate::core::services::access::{require_member, require_owner_permission, require_permission};
use crate::core::status::compute_status;
use crate::error::Error;

/// Stored settings of a form, or the defaults when none were saved yet.
pub async fn load_settings<S>(store: &mut S, form_id: i32) -> Result<FormSettings, Error>
where
    S: Store,
{
    Ok(SettingsCommon::get(store, form_id).await?.unwrap_or_else(|| FormSettings::defaults(form_id)))
}

pub async fn submission_count<S>(store: &mut S, form_id: i32) -> Result<i64, Error>
where
    S: Store,
{
    SubmissionCommon::count(
        store,
        &SubmissionQuery {
            form_id_eq: Some(form_id),
            exclude_drafts: true,
            ..default::default()
        },
    )
    .await
}

pub async fn form_view<S>(store: &mut S, form: Form, now: DateTime<Utc>) -> Result<FormView, Error>
where
    S: Store,
{
    let settings = load_settings(store, form.id).await?;
    let submission_count = submission_count(store, form.id).await?;
    Ok(FormView {
        status: compute_status(&settings, now, submission_count),
        form,
        submission_count,
    })
}

/// Resolves the owner a new form or template will get.
pub async fn new_owner<S, G>(store: &mut S, grants: &G, user_id: i32, organisation_id: Option<i32>, permission: Permission) -> Result<Owner, Error>
where
    S: Store,
    G: RoleGrants,
{
    match organisation_id {
        Some(org_id) => {
            require_permission(store, grants, org_id, user_id, permission).await?;
            Ok(Owner::organisation(org_id))
        }
        None => Ok(Owner::user(user_id)),
    }
}

/// Inserts a form with default settings. The caller commits.
pub async fn insert_form<S>(store: &mut S, owner: Owner, title: String, description: Option<String>, colors: (Option<String>, Option<String>)) -> Result<Form, Error>
where
    S: Store,
{
    let id = FormCommon::insert(
        store,
        FormInsert {
            code: Uuid::new_v4(),
            title,
            description,
            owner,
            primary_color: colors.0,
            secondary_color: colors.1,
        },
    )
    .await?;
    SettingsCommon::upsert(store, &FormSettings::defaults(id)).await?;
    FormCommon::get(store, id).await
}

pub async fn create_form<T, G>(mut tx: T, grants: &G, user_id: i32, create: FormCreate) -> Result<Form, Error>
where
    T: TxStore,
    G: RoleGrants,
{
    create.validate()?;
    let owner = new_owner(&mut tx, grants, user_id, create.organisation_id, Permission::FormsCreate).await?;
    let form = insert_form(&mut tx, owner, create.title, create.description, (create.colors.primary, create.colors.secondary)).await?;
    tx.commit().await?;
    Ok(form)
}

pub async fn list_forms<S>(db: &mut S, user_id: i32, organisation_id: Option<i32>, pagination: Pagination, now: DateTime<Utc>) -> Result<(Vec<FormView>, i64), Error>
where
    S: Store,
{
    let owner = match organisation_id {
        Some(org_id) => {
            require_member(db, org_id, user_id).await?;
            Owner::organisation(org_id)
        }
        None => Owner::user(user_id),
    };
    let query = FormQuery { owner_eq: Some(owner) };
    let total = FormCommon::count(db, &query).await?;
    let forms = FormCommon::query(db, &query, Some(pagination)).await?;
    let mut views = Vec::with_capacity(forms.len());
    for form in forms {
        views.push(form_view(db, form, now).await?);
    }
    Ok((views, total))
}

/// Loads a form by code after checking `permission` against its owner.
pub async fn authorized_form<S, G>(store: &mut S, grants: &G, user_id: i32, code: Uuid, permission: Permission) -> Result<Form, Error>
where
    S: Store,
    G: RoleGrants,
{
    let form = FormCommon::get_by_code(store, code).await?;
    require_owner_permission(store, grants, form.owner(), user_id, permission).await?;
    Ok(form)
}

pub async fn get_form<S, G>(db: &mut S, grants: &G, user_id: i32, code: Uuid, now: DateTime<Utc>) -> Result<FormView, Error>
where
    S: Store,
    G: RoleGrants,
{
    let form = authorized_form(db, grants, user_id, code, Permission::SubmissionsView).await?;
    form_view(db, form, now).await
}

pub async fn update_form<T, G>(mut tx: T, grants: &G, user_id: i32, code: Uuid, update: FormUpdate) -> Result<Form, Error>
where
    T: TxStore,
    G: RoleGrants,
{
    update.validate()?;
    let form = authorized_form(&mut tx, grants, user_id, code, Permission::FormsEdit).await?;
    FormCommon::update(
        &mut tx,
        form.id,
        FormUpdateRow {
            title: update.title,
            description: update.description,
            primary_color: update.colors.primary,
            secondary_color: update.colors.secondary,
        },
    )
    .await?;
    let form = FormCommon::get(&mut tx, form.id).await?;
    tx.commit().await?;
    Ok(form)
}

pub async fn delete_form<T, G>(mut tx: T, grants: &G, user_id: i32, code: Uuid) -> Result<(), Error>
where
    T: TxStore,
    G: RoleGrants,
{
    let form = authorized_form(&mut tx, grants, user_id, code, Permission::FormsDelete).await?;
    FormCommon::delete(&mut tx, form.id).await?;
    tx.commit().await?;
    log::info!("form {} deleted by user {}", form.code, user_id);
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct RespondentView {
    #[serde(flatten)]
    pub form: FormView,
    pub sharing_type: SharingType,
    pub requires_email: bool,
    pub sections: Vec<SectionWithFields>,
}

/// What a respondent sees. Draft forms are hidden.
pub async fn respondent_view<S>(db: &mut S, code: Uuid, now: DateTime<Utc>) -> Result<RespondentView, Error>
where
    S: Store,
{
    let form = FormCommon::get_by_code(db, code).await?;
    let settings = load_settings(db, form.id).await?;
    let view = form_view(db, form, now).await?;
    if view.status == FormStatus::Draft {
        return Err(Error::NotFound("form".into()));
    }
    let sections = SectionCommon::query(db, view.form.id).await?;
    let fields = FieldCommon::query(db, view.form.id).await?;
    Ok(RespondentView {
        form: view,
        sharing_type: settings.sharing_type,
        requires_email: settings.requires_email(),
        sections: group_sections(sections, fields),
    })
}

use uuid::Uuid;
use validator::Validate;

use crate::core::models::{
    form::Form,
    organisation::slugify,
    schema::SchemaSave,
    template::{FormFromTemplate, Insert, RatingCreate, RatingSummary, Template, TemplateCreate, TemplateUpdate, Update},
};
use crate::core::permission::{Permission, RoleGrants};
use crate::core::ports::repository::{MemberCommon, Store, TemplateCommon, TxStore};
use crate::core::services::access::require_owner_permission;
use crate::core::services::form::{authorized_form, insert_form, new_owner};
use crate::core::services::schema::{apply_schema, load_schema};
use crate::error::Error;

async fn unique_slug<S>(store: &mut S, name: &str) -> Result<String, Error>
where
    S: Store,
{
    let base = match slugify(name) {
        s if s.is_empty() => "template".to_owned(),
        s => s,
    };
    let mut slug = base.clone();
    let mut n = 1;
    while TemplateCommon::slug_exists(store, &slug).await? {
        n += 1;
        slug = format!("{}-{}", base, n);
    }
    Ok(slug)
}

/// Snapshots the schema of a form into a new template.
pub async fn create_template<T, G>(mut tx: T, grants: &G, user_id: i32, code: Uuid, create: TemplateCreate) -> Result<Template, Error>
where
    T: TxStore,
    G: RoleGrants,
{
    create.validate()?;
    let form = authorized_form(&mut tx, grants, user_id, code, Permission::FormsEdit).await?;
    let owner = new_owner(&mut tx, grants, user_id, create.organisation_id, Permission::TemplatesCreate).await?;
    let sections = load_schema(&mut tx, form.id).await?;
    if sections.is_empty() {
        return Err(Error::BusinessError("the form has no sections to save".into()));
    }
    let slug = unique_slug(&mut tx, &create.name).await?;
    let id = TemplateCommon::insert(
        &mut tx,
        Insert {
            name: create.name,
            slug,
            description: create.description,
            owner,
            visibility: create.visibility,
            data: SchemaSave::from_sections(sections),
        },
    )
    .await?;
    let template = TemplateCommon::get(&mut tx, id).await?;
    tx.commit().await?;
    log::info!("template {} created from form {} by user {}", template.slug, form.code, user_id);
    Ok(template)
}

pub async fn list_templates<S>(db: &mut S, user_id: i32) -> Result<Vec<Template>, Error>
where
    S: Store,
{
    let organisations = MemberCommon::organisation_ids(db, user_id).await?;
    TemplateCommon::query_usable(db, user_id, &organisations).await
}

/// Creates a form carrying a copy of the template's schema.
pub async fn form_from_template<T, G>(mut tx: T, grants: &G, user_id: i32, template_id: i32, create: FormFromTemplate) -> Result<Form, Error>
where
    T: TxStore,
    G: RoleGrants,
{
    create.validate()?;
    let template = TemplateCommon::get(&mut tx, template_id).await?;
    let organisations = MemberCommon::organisation_ids(&mut tx, user_id).await?;
    if !template.can_be_used_by(user_id, &organisations) {
        return Err(Error::Unauthorized);
    }
    let owner = new_owner(&mut tx, grants, user_id, create.organisation_id, Permission::FormsCreate).await?;
    let title = create.title.unwrap_or_else(|| template.name.clone());
    let form = insert_form(&mut tx, owner, title, template.description.clone(), (None, None)).await?;
    apply_schema(&mut tx, form.id, &template.data.0.clone().without_ids()).await?;
    TemplateCommon::increment_use_count(&mut tx, template.id).await?;
    tx.commit().await?;
    Ok(form)
}

pub async fn update_template<T, G>(mut tx: T, grants: &G, user_id: i32, template_id: i32, update: TemplateUpdate) -> Result<Template, Error>
where
    T: TxStore,
    G: RoleGrants,
{
    update.validate()?;
    let template = TemplateCommon::get(&mut tx, template_id).await?;
    require_owner_permission(&mut tx, grants, template.owner(), user_id, Permission::TemplatesEdit).await?;
    TemplateCommon::update(&mut tx, template.id, Update::apply(&template, update)).await?;
    let template = TemplateCommon::get(&mut tx, template.id).await?;
    tx.commit().await?;
    log::info!("template {} updated by user {}", template.slug, user_id);
    Ok(template)
}

/// Blank terms search nothing; callers fall back to [`list_templates`].
pub async fn search_templates<S>(db: &mut S, user_id: i32, term: &str) -> Result<Vec<Template>, Error>
where
    S: Store,
{
    let term = term.trim();
    if term.is_empty() {
        return Ok(vec![]);
    }
    TemplateCommon::search(db, user_id, term).await
}

/// Rating again replaces the user's earlier rating.
pub async fn rate_template<T>(mut tx: T, user_id: i32, template_id: i32, create: RatingCreate) -> Result<RatingSummary, Error>
where
    T: TxStore,
{
    create.validate()?;
    let template = TemplateCommon::get(&mut tx, template_id).await?;
    let organisations = MemberCommon::organisation_ids(&mut tx, user_id).await?;
    if !template.can_be_used_by(user_id, &organisations) {
        return Err(Error::Unauthorized);
    }
    TemplateCommon::upsert_rating(&mut tx, template.id, user_id, create.rating, create.review).await?;
    let ratings: Vec<i32> = TemplateCommon::ratings(&mut tx, template.id).await?.into_iter().map(|r| r.rating).collect();
    tx.commit().await?;
    Ok(RatingSummary::from_ratings(&ratings))
}

pub async fn delete_template<T, G>(mut tx: T, grants: &G, user_id: i32, template_id: i32) -> Result<(), Error>
where
    T: TxStore,
    G: RoleGrants,
{
    let template = TemplateCommon::get(&mut tx, template_id).await?;
    require_owner_permission(&mut tx, grants, template.owner(), user_id, Permission::TemplatesDelete).await?;
    TemplateCommon::delete(&mut tx, template.id).await?;
    tx.commit().await?;
    log::info!("template {} deleted by user {}", template.slug, user_id);
    Ok(())
}

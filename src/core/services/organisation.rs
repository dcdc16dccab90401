use serde_json::json;
use validator::Validate;

use crate::core::hierarchy::{ensure_acyclic, rebuild_hierarchy, root_of};
use crate::core::models::{
    activity::Event,
    member::{Insert as MemberInsert, MemberStatus, Role},
    organisation::{slugify, Insert, Organisation, OrganisationCreate, OrganisationUpdate, Query, Related, Update},
};
use crate::core::permission::{Permission, RoleGrants};
use crate::core::ports::repository::{HierarchyCommon, MemberCommon, OrganisationCommon, Store, TxStore};
use crate::core::services::access::{require_member, require_permission};
use crate::core::services::activity::record;
use crate::error::Error;

async fn unique_slug<S>(store: &mut S, slug: &str, exclude_id: Option<i32>) -> Result<(), Error>
where
    S: Store,
{
    if OrganisationCommon::slug_exists(store, slug, exclude_id).await? {
        return Err(Error::BusinessError(format!("slug {} is already taken", slug)));
    }
    Ok(())
}

/// Creates an organisation whose creator becomes its owner and only active
/// member. Nesting under a parent needs `organisation.manage` on the parent.
pub async fn create_organisation<T, G>(mut tx: T, grants: &G, user_id: i32, create: OrganisationCreate) -> Result<Organisation, Error>
where
    T: TxStore,
    G: RoleGrants,
{
    create.validate()?;
    let slug = match &create.slug {
        Some(slug) => slugify(slug),
        None => slugify(&create.name),
    };
    if slug.is_empty() {
        return Err(Error::field("slug", "must contain letters or digits"));
    }
    unique_slug(&mut tx, &slug, None).await?;
    if let Some(parent_id) = create.parent_id {
        require_permission(&mut tx, grants, parent_id, user_id, Permission::OrganisationManage).await?;
    }
    let id = OrganisationCommon::insert(
        &mut tx,
        Insert {
            name: create.name,
            slug,
            short_name: create.short_name,
            owner_id: user_id,
            parent_id: create.parent_id,
            org_type: create.org_type,
        },
    )
    .await?;
    MemberCommon::insert(
        &mut tx,
        MemberInsert {
            organisation_id: id,
            user_id,
            role: Role::Owner,
            permissions: None,
            status: MemberStatus::Active,
            invited_by: None,
        },
    )
    .await?;
    rebuild_hierarchy(&mut tx, id).await?;
    let org = OrganisationCommon::get(&mut tx, id).await?;
    record(&mut tx, id, user_id, Event::Created, json!({ "attributes": org.attributes() })).await?;
    tx.commit().await?;
    log::info!("organisation {} ({}) created by user {}", org.id, org.slug, user_id);
    Ok(org)
}

pub async fn update_organisation<T, G>(mut tx: T, grants: &G, user_id: i32, id: i32, update: OrganisationUpdate) -> Result<Organisation, Error>
where
    T: TxStore,
    G: RoleGrants,
{
    update.validate()?;
    let current = require_permission(&mut tx, grants, id, user_id, Permission::OrganisationManage).await?;
    let mut next = Update::from_current(&current);
    if let Some(name) = update.name {
        next.name = name;
    }
    if let Some(slug) = update.slug {
        let slug = slugify(&slug);
        if slug.is_empty() {
            return Err(Error::field("slug", "must contain letters or digits"));
        }
        if slug != current.slug {
            unique_slug(&mut tx, &slug, Some(id)).await?;
        }
        next.slug = slug;
    }
    if update.short_name.is_some() {
        next.short_name = update.short_name;
    }
    if let Some(org_type) = update.org_type {
        next.org_type = org_type;
    }
    if let Some(allow) = update.allow_member_form_creation {
        next.allow_member_form_creation = allow;
    }
    if let Some(require) = update.require_form_approval {
        next.require_form_approval = require;
    }
    let parent_changed = match update.parent_id {
        Some(parent_id) if parent_id != current.parent_id => {
            if let Some(parent_id) = parent_id {
                ensure_acyclic(&mut tx, id, parent_id).await?;
                require_permission(&mut tx, grants, parent_id, user_id, Permission::OrganisationManage).await?;
            }
            next.parent_id = parent_id;
            true
        }
        _ => false,
    };
    let next_parent = next.parent_id;
    OrganisationCommon::update(&mut tx, id, next).await?;
    if parent_changed {
        rebuild_hierarchy(&mut tx, id).await?;
        record(&mut tx, id, user_id, Event::Moved, json!({ "old_parent_id": current.parent_id, "new_parent_id": next_parent })).await?;
        log::info!("organisation {} moved under {:?} by user {}", id, next_parent, user_id);
    }
    let org = OrganisationCommon::get(&mut tx, id).await?;
    record(&mut tx, id, user_id, Event::Updated, json!({ "old": current.attributes(), "attributes": org.attributes() })).await?;
    tx.commit().await?;
    log::info!("organisation {} updated by user {}", id, user_id);
    Ok(org)
}

pub async fn delete_organisation<T, G>(mut tx: T, grants: &G, user_id: i32, id: i32) -> Result<(), Error>
where
    T: TxStore,
    G: RoleGrants,
{
    let org = require_permission(&mut tx, grants, id, user_id, Permission::OrganisationDelete).await?;
    let children = OrganisationCommon::query(
        &mut tx,
        &Query {
            parent_id_eq: Some(id),
            ..default::default()
        },
    )
    .await?;
    if !children.is_empty() {
        return Err(Error::BusinessError("move or delete the sub-organisations first".into()));
    }
    OrganisationCommon::delete(&mut tx, id).await?;
    record(&mut tx, id, user_id, Event::Deleted, json!({ "old": org.attributes() })).await?;
    tx.commit().await?;
    log::info!("organisation {} deleted by user {}", id, user_id);
    Ok(())
}

/// Organisations the user belongs to, pending invitations included.
pub async fn list_organisations<S>(db: &mut S, user_id: i32) -> Result<Vec<Organisation>, Error>
where
    S: Store,
{
    OrganisationCommon::query(
        db,
        &Query {
            member_id: Some(user_id),
            ..default::default()
        },
    )
    .await
}

pub async fn get_organisation<S>(db: &mut S, user_id: i32, id: i32) -> Result<Organisation, Error>
where
    S: Store,
{
    require_member(db, id, user_id).await?;
    OrganisationCommon::get(db, id).await
}

/// Nearest ancestor first.
pub async fn ancestors<S>(db: &mut S, user_id: i32, id: i32) -> Result<Vec<Related>, Error>
where
    S: Store,
{
    require_member(db, id, user_id).await?;
    HierarchyCommon::ancestors(db, id).await
}

pub async fn descendants<S>(db: &mut S, user_id: i32, id: i32) -> Result<Vec<Related>, Error>
where
    S: Store,
{
    require_member(db, id, user_id).await?;
    HierarchyCommon::descendants(db, id).await
}

/// Top of the tree containing `id`, the organisation itself at depth 0 when it has no parent.
pub async fn root<S>(db: &mut S, user_id: i32, id: i32) -> Result<Related, Error>
where
    S: Store,
{
    require_member(db, id, user_id).await?;
    match root_of(HierarchyCommon::ancestors(db, id).await?) {
        Some(related) => Ok(related),
        None => Ok(Related {
            organisation: OrganisationCommon::get(db, id).await?,
            depth: 0,
        }),
    }
}

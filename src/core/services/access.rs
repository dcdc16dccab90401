use crate::core::models::form::{Owner, OwnerKind};
use crate::core::models::member::{Member, MemberStatus};
use crate::core::models::organisation::Organisation;
use crate::core::permission::{resolve, Permission, RoleGrants};
use crate::core::ports::repository::{MemberCommon, OrganisationCommon, Store, UserCommon};
use crate::error::Error;

pub async fn has_permission<S, G>(store: &mut S, grants: &G, organisation_id: i32, user_id: i32, permission: Permission) -> Result<bool, Error>
where
    S: Store,
    G: RoleGrants,
{
    let org = OrganisationCommon::get(store, organisation_id).await?;
    let member = MemberCommon::get(store, organisation_id, user_id).await?;
    resolve(grants, &org, member.as_ref(), user_id, permission)
}

pub async fn require_permission<S, G>(store: &mut S, grants: &G, organisation_id: i32, user_id: i32, permission: Permission) -> Result<Organisation, Error>
where
    S: Store,
    G: RoleGrants,
{
    let org = OrganisationCommon::get(store, organisation_id).await?;
    let member = MemberCommon::get(store, organisation_id, user_id).await?;
    if !resolve(grants, &org, member.as_ref(), user_id, permission)? {
        return Err(Error::Unauthorized);
    }
    Ok(org)
}

/// Any active member may read an organisation.
pub async fn require_member<S>(store: &mut S, organisation_id: i32, user_id: i32) -> Result<Member, Error>
where
    S: Store,
{
    match MemberCommon::get(store, organisation_id, user_id).await? {
        Some(m) if m.status == MemberStatus::Active => Ok(m),
        _ => Err(Error::Unauthorized),
    }
}

/// User-owned resources answer to their owner only; organisation-owned ones
/// go through the permission resolver.
pub async fn require_owner_permission<S, G>(store: &mut S, grants: &G, owner: Owner, user_id: i32, permission: Permission) -> Result<(), Error>
where
    S: Store,
    G: RoleGrants,
{
    if owner_permits(store, grants, owner, user_id, permission).await? {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}

pub async fn owner_permits<S, G>(store: &mut S, grants: &G, owner: Owner, user_id: i32, permission: Permission) -> Result<bool, Error>
where
    S: Store,
    G: RoleGrants,
{
    match owner.kind {
        OwnerKind::User => Ok(owner.id == user_id),
        OwnerKind::Organisation => has_permission(store, grants, owner.id, user_id, permission).await,
    }
}

pub async fn require_admin<S>(store: &mut S, user_id: i32) -> Result<(), Error>
where
    S: Store,
{
    if !UserCommon::get(store, user_id).await?.is_admin {
        return Err(Error::Unauthorized);
    }
    Ok(())
}

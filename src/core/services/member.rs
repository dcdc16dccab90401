use serde_json::json;
use validator::Validate;

use crate::core::models::{
    activity::Event,
    member::{Insert, Member, MemberDetail, MemberInvite, MemberStatus, OwnershipTransfer, PermissionsUpdate, Role, RoleUpdate},
    organisation::Organisation,
};
use crate::core::permission::{parse_overrides, Permission, RoleGrants};
use crate::core::ports::repository::{MemberCommon, OrganisationCommon, Store, TxStore, UserCommon};
use crate::core::services::access::{require_member, require_permission};
use crate::core::services::activity::record;
use crate::error::Error;

pub async fn list_members<S>(db: &mut S, user_id: i32, organisation_id: i32) -> Result<Vec<MemberDetail>, Error>
where
    S: Store,
{
    require_member(db, organisation_id, user_id).await?;
    MemberCommon::query(db, organisation_id).await
}

/// The member `target` of `org`, refusing the organisation owner.
async fn managed_member<S>(store: &mut S, org: &Organisation, target: i32) -> Result<Member, Error>
where
    S: Store,
{
    if org.owner_id == target {
        return Err(Error::BusinessError("the owner can only change through an ownership transfer".into()));
    }
    MemberCommon::get(store, org.id, target).await?.ok_or_else(|| Error::NotFound("member".into()))
}

pub async fn invite_member<T, G>(mut tx: T, grants: &G, user_id: i32, organisation_id: i32, invite: MemberInvite) -> Result<MemberDetail, Error>
where
    T: TxStore,
    G: RoleGrants,
{
    invite.validate()?;
    if invite.role == Role::Owner {
        return Err(Error::field("role", "owners are made through an ownership transfer"));
    }
    if let Some(permissions) = &invite.permissions {
        parse_overrides(permissions)?;
    }
    require_permission(&mut tx, grants, organisation_id, user_id, Permission::MembersManage).await?;
    let user = UserCommon::get_by_email(&mut tx, &invite.email).await?.ok_or_else(|| Error::NotFound("user".into()))?;
    if MemberCommon::get(&mut tx, organisation_id, user.id).await?.is_some() {
        return Err(Error::BusinessError(format!("{} is already a member", invite.email)));
    }
    MemberCommon::insert(
        &mut tx,
        Insert {
            organisation_id,
            user_id: user.id,
            role: invite.role,
            permissions: invite.permissions,
            status: MemberStatus::Invited,
            invited_by: Some(user_id),
        },
    )
    .await?;
    let detail = MemberCommon::query(&mut tx, organisation_id)
        .await?
        .into_iter()
        .find(|m| m.id == user.id)
        .ok_or_else(|| Error::NotFound("member".into()))?;
    record(&mut tx, organisation_id, user_id, Event::MemberInvited, json!({ "user_id": user.id, "role": invite.role })).await?;
    tx.commit().await?;
    log::info!("user {} invited to organisation {} as {} by user {}", user.id, organisation_id, invite.role.as_str(), user_id);
    Ok(detail)
}

pub async fn accept_invitation<T>(mut tx: T, user_id: i32, organisation_id: i32) -> Result<(), Error>
where
    T: TxStore,
{
    match MemberCommon::get(&mut tx, organisation_id, user_id).await? {
        Some(m) if m.status == MemberStatus::Invited => {}
        _ => return Err(Error::NotFound("invitation".into())),
    }
    MemberCommon::activate(&mut tx, organisation_id, user_id).await?;
    record(&mut tx, organisation_id, user_id, Event::MemberJoined, json!({ "user_id": user_id })).await?;
    tx.commit().await?;
    log::info!("user {} joined organisation {}", user_id, organisation_id);
    Ok(())
}

/// Members may leave on their own; removing someone else needs `members.manage`.
pub async fn remove_member<T, G>(mut tx: T, grants: &G, user_id: i32, organisation_id: i32, target: i32) -> Result<(), Error>
where
    T: TxStore,
    G: RoleGrants,
{
    let org = if target == user_id {
        OrganisationCommon::get(&mut tx, organisation_id).await?
    } else {
        require_permission(&mut tx, grants, organisation_id, user_id, Permission::MembersManage).await?
    };
    let member = managed_member(&mut tx, &org, target).await?;
    MemberCommon::delete(&mut tx, organisation_id, target).await?;
    record(&mut tx, organisation_id, user_id, Event::MemberRemoved, json!({ "user_id": target, "role": member.role })).await?;
    tx.commit().await?;
    log::info!("user {} removed from organisation {} by user {}", target, organisation_id, user_id);
    Ok(())
}

pub async fn update_role<T, G>(mut tx: T, grants: &G, user_id: i32, organisation_id: i32, target: i32, update: RoleUpdate) -> Result<(), Error>
where
    T: TxStore,
    G: RoleGrants,
{
    if update.role == Role::Owner {
        return Err(Error::field("role", "owners are made through an ownership transfer"));
    }
    let org = require_permission(&mut tx, grants, organisation_id, user_id, Permission::MembersManage).await?;
    let member = managed_member(&mut tx, &org, target).await?;
    MemberCommon::update_role(&mut tx, organisation_id, target, update.role).await?;
    record(
        &mut tx,
        organisation_id,
        user_id,
        Event::MemberRoleUpdated,
        json!({ "user_id": target, "old_role": member.role, "new_role": update.role }),
    )
    .await?;
    tx.commit().await?;
    log::info!("user {} in organisation {} is now {} (by user {})", target, organisation_id, update.role.as_str(), user_id);
    Ok(())
}

/// Sets or clears a member's permission override. An override replaces the
/// role's permission set entirely.
pub async fn update_permissions<T, G>(mut tx: T, grants: &G, user_id: i32, organisation_id: i32, target: i32, update: PermissionsUpdate) -> Result<(), Error>
where
    T: TxStore,
    G: RoleGrants,
{
    if let Some(permissions) = &update.permissions {
        parse_overrides(permissions)?;
    }
    let org = require_permission(&mut tx, grants, organisation_id, user_id, Permission::MembersManage).await?;
    let member = managed_member(&mut tx, &org, target).await?;
    let properties = json!({ "user_id": target, "old_permissions": member.permissions, "new_permissions": update.permissions });
    MemberCommon::update_permissions(&mut tx, organisation_id, target, update.permissions).await?;
    record(&mut tx, organisation_id, user_id, Event::MemberPermissionsUpdated, properties).await?;
    tx.commit().await?;
    log::info!("permissions of user {} in organisation {} changed by user {}", target, organisation_id, user_id);
    Ok(())
}

/// Hands the organisation to another active member. The previous owner stays
/// on as admin.
pub async fn transfer_ownership<T>(mut tx: T, user_id: i32, organisation_id: i32, transfer: OwnershipTransfer) -> Result<Organisation, Error>
where
    T: TxStore,
{
    let org = OrganisationCommon::get(&mut tx, organisation_id).await?;
    if org.owner_id != user_id {
        return Err(Error::Unauthorized);
    }
    if transfer.user_id == user_id {
        return Err(Error::BusinessError("you already own this organisation".into()));
    }
    match MemberCommon::get(&mut tx, organisation_id, transfer.user_id).await? {
        Some(m) if m.status == MemberStatus::Active => {}
        _ => return Err(Error::BusinessError("the new owner must be an active member".into())),
    }
    OrganisationCommon::set_owner(&mut tx, organisation_id, transfer.user_id).await?;
    MemberCommon::update_role(&mut tx, organisation_id, transfer.user_id, Role::Owner).await?;
    MemberCommon::update_permissions(&mut tx, organisation_id, transfer.user_id, None).await?;
    MemberCommon::update_role(&mut tx, organisation_id, user_id, Role::Admin).await?;
    record(
        &mut tx,
        organisation_id,
        user_id,
        Event::OwnershipTransferred,
        json!({ "old_owner_id": user_id, "new_owner_id": transfer.user_id }),
    )
    .await?;
    let org = OrganisationCommon::get(&mut tx, organisation_id).await?;
    tx.commit().await?;
    log::info!("organisation {} transferred from user {} to user {}", organisation_id, user_id, transfer.user_id);
    Ok(org)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::permission::test::StaticGrants;
    use crate::core::ports::repository::Manager;
    use crate::core::services::fixture;
    use crate::database::memory::MemoryManager;

    fn invite(email: &str, role: &str) -> MemberInvite {
        serde_json::from_str(&format!(r#"{{"email": "{}", "role": "{}"}}"#, email, role)).unwrap()
    }

    fn member_of(manager: &MemoryManager, org: i32, user_id: i32) -> Option<Member> {
        manager.state().members.into_iter().find(|m| m.organisation_id == org && m.user_id == user_id)
    }

    #[tokio::test]
    async fn test_invite_then_accept() {
        let manager = MemoryManager::new();
        let ada = manager.add_user("Ada", "ada@example.com", false);
        let bob = manager.add_user("Bob", "bob@example.com", false);
        let org = fixture::organisation(&manager, ada, "Choir", None).await;

        let detail = invite_member(manager.tx().await.unwrap(), &StaticGrants, ada, org, invite("BOB@example.com", "editor")).await.unwrap();
        assert_eq!(detail.id, bob);
        assert_eq!(detail.status, MemberStatus::Invited);

        let again = invite_member(manager.tx().await.unwrap(), &StaticGrants, ada, org, invite("bob@example.com", "viewer")).await;
        assert!(matches!(again, Err(Error::BusinessError(_))));
        let unknown = invite_member(manager.tx().await.unwrap(), &StaticGrants, ada, org, invite("nobody@example.com", "viewer")).await;
        assert!(matches!(unknown, Err(Error::NotFound(_))));

        let mut db = manager.db().await.unwrap();
        assert!(matches!(list_members(&mut db, bob, org).await, Err(Error::Unauthorized)));

        accept_invitation(manager.tx().await.unwrap(), bob, org).await.unwrap();
        assert_eq!(member_of(&manager, org, bob).unwrap().status, MemberStatus::Active);
        assert_eq!(list_members(&mut db, bob, org).await.unwrap().len(), 2);
        assert!(matches!(accept_invitation(manager.tx().await.unwrap(), bob, org).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invite_needs_members_manage() {
        let manager = MemoryManager::new();
        let ada = manager.add_user("Ada", "ada@example.com", false);
        let bob = manager.add_user("Bob", "bob@example.com", false);
        manager.add_user("Cy", "cy@example.com", false);
        let org = fixture::organisation(&manager, ada, "Choir", None).await;
        fixture::member(&manager, org, bob, Role::Editor).await;
        let res = invite_member(manager.tx().await.unwrap(), &StaticGrants, bob, org, invite("cy@example.com", "viewer")).await;
        assert!(matches!(res, Err(Error::Unauthorized)));
        let res = invite_member(manager.tx().await.unwrap(), &StaticGrants, ada, org, invite("cy@example.com", "owner")).await;
        assert!(matches!(res, Err(Error::InvalidFields(_))));
    }

    #[tokio::test]
    async fn test_owner_is_protected() {
        let manager = MemoryManager::new();
        let ada = manager.add_user("Ada", "ada@example.com", false);
        let bob = manager.add_user("Bob", "bob@example.com", false);
        let org = fixture::organisation(&manager, ada, "Choir", None).await;
        fixture::member(&manager, org, bob, Role::Admin).await;

        let res = remove_member(manager.tx().await.unwrap(), &StaticGrants, bob, org, ada).await;
        assert!(matches!(res, Err(Error::BusinessError(_))));
        let res = update_role(manager.tx().await.unwrap(), &StaticGrants, bob, org, ada, RoleUpdate { role: Role::Viewer }).await;
        assert!(matches!(res, Err(Error::BusinessError(_))));
        let res = update_permissions(manager.tx().await.unwrap(), &StaticGrants, bob, org, ada, PermissionsUpdate { permissions: None }).await;
        assert!(matches!(res, Err(Error::BusinessError(_))));
    }

    #[tokio::test]
    async fn test_role_and_override_changes() {
        let manager = MemoryManager::new();
        let ada = manager.add_user("Ada", "ada@example.com", false);
        let bob = manager.add_user("Bob", "bob@example.com", false);
        let org = fixture::organisation(&manager, ada, "Choir", None).await;
        fixture::member(&manager, org, bob, Role::Viewer).await;

        update_role(manager.tx().await.unwrap(), &StaticGrants, ada, org, bob, RoleUpdate { role: Role::Editor }).await.unwrap();
        assert_eq!(member_of(&manager, org, bob).unwrap().role, Role::Editor);

        let bad = PermissionsUpdate {
            permissions: Some(vec!["forms.fly".into()]),
        };
        let res = update_permissions(manager.tx().await.unwrap(), &StaticGrants, ada, org, bob, bad).await;
        assert!(matches!(res, Err(Error::InvalidFields(_))));

        let good = PermissionsUpdate {
            permissions: Some(vec!["forms.edit".into()]),
        };
        update_permissions(manager.tx().await.unwrap(), &StaticGrants, ada, org, bob, good).await.unwrap();
        assert_eq!(member_of(&manager, org, bob).unwrap().permissions, Some(vec!["forms.edit".to_owned()]));
    }

    #[tokio::test]
    async fn test_members_can_leave() {
        let manager = MemoryManager::new();
        let ada = manager.add_user("Ada", "ada@example.com", false);
        let bob = manager.add_user("Bob", "bob@example.com", false);
        let cy = manager.add_user("Cy", "cy@example.com", false);
        let org = fixture::organisation(&manager, ada, "Choir", None).await;
        fixture::member(&manager, org, bob, Role::Viewer).await;
        fixture::member(&manager, org, cy, Role::Viewer).await;

        let res = remove_member(manager.tx().await.unwrap(), &StaticGrants, bob, org, cy).await;
        assert!(matches!(res, Err(Error::Unauthorized)));
        remove_member(manager.tx().await.unwrap(), &StaticGrants, bob, org, bob).await.unwrap();
        assert!(member_of(&manager, org, bob).is_none());
        remove_member(manager.tx().await.unwrap(), &StaticGrants, ada, org, cy).await.unwrap();
        assert!(member_of(&manager, org, cy).is_none());
    }

    #[tokio::test]
    async fn test_transfer_ownership() {
        let manager = MemoryManager::new();
        let ada = manager.add_user("Ada", "ada@example.com", false);
        let bob = manager.add_user("Bob", "bob@example.com", false);
        let cy = manager.add_user("Cy", "cy@example.com", false);
        let org = fixture::organisation(&manager, ada, "Choir", None).await;
        fixture::member(&manager, org, bob, Role::Editor).await;

        let res = transfer_ownership(manager.tx().await.unwrap(), bob, org, OwnershipTransfer { user_id: bob }).await;
        assert!(matches!(res, Err(Error::Unauthorized)));
        let res = transfer_ownership(manager.tx().await.unwrap(), ada, org, OwnershipTransfer { user_id: cy }).await;
        assert!(matches!(res, Err(Error::BusinessError(_))));

        let org_after = transfer_ownership(manager.tx().await.unwrap(), ada, org, OwnershipTransfer { user_id: bob }).await.unwrap();
        assert_eq!(org_after.owner_id, bob);
        assert_eq!(member_of(&manager, org, bob).unwrap().role, Role::Owner);
        assert_eq!(member_of(&manager, org, ada).unwrap().role, Role::Admin);
    }

    #[tokio::test]
    async fn test_membership_changes_are_logged() {
        let manager = MemoryManager::new();
        let ada = manager.add_user("Ada", "ada@example.com", false);
        let bob = manager.add_user("Bob", "bob@example.com", false);
        let cy = manager.add_user("Cy", "cy@example.com", false);
        let org = fixture::organisation(&manager, ada, "Choir", None).await;
        fixture::member(&manager, org, bob, Role::Editor).await;
        fixture::member(&manager, org, cy, Role::Viewer).await;

        let overrides = PermissionsUpdate {
            permissions: Some(vec!["forms.edit".into()]),
        };
        update_permissions(manager.tx().await.unwrap(), &StaticGrants, ada, org, cy, overrides).await.unwrap();
        remove_member(manager.tx().await.unwrap(), &StaticGrants, cy, org, cy).await.unwrap();
        transfer_ownership(manager.tx().await.unwrap(), ada, org, OwnershipTransfer { user_id: bob }).await.unwrap();

        let logged: Vec<_> = manager.state().activities.into_iter().filter(|a| a.subject_id == org).collect();
        let events: Vec<_> = logged.iter().map(|a| a.event.as_str()).collect();
        assert_eq!(events, vec!["created", "member_permissions_updated", "member_removed", "ownership_transferred"]);
        assert_eq!(logged[1].properties.0["old_permissions"], serde_json::Value::Null);
        assert_eq!(logged[1].properties.0["new_permissions"], serde_json::json!(["forms.edit"]));
        assert_eq!(logged[2].causer_id, Some(cy));
        assert_eq!(logged[2].properties.0["role"], "viewer");
        assert_eq!(logged[3].properties.0["old_owner_id"], ada);
        assert_eq!(logged[3].properties.0["new_owner_id"], bob);
    }
}

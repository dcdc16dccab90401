use serde_json::Value;

use crate::core::models::{
    activity::{Activity, Event, Insert, Query, ORGANISATION_LOG},
    common::Pagination,
};
use crate::core::ports::repository::{ActivityCommon, Store};
use crate::core::services::access::require_member;
use crate::error::Error;

/// Records a change to an organisation inside the caller's transaction.
pub async fn record<S>(store: &mut S, organisation_id: i32, causer_id: i32, event: Event, properties: Value) -> Result<(), Error>
where
    S: Store,
{
    ActivityCommon::insert(
        store,
        Insert {
            log_name: ORGANISATION_LOG,
            subject_type: ORGANISATION_LOG,
            subject_id: organisation_id,
            event,
            causer_id: Some(causer_id),
            properties,
        },
    )
    .await?;
    log::debug!("organisation {} {} by user {}", organisation_id, event.as_str(), causer_id);
    Ok(())
}

async fn paged<S>(db: &mut S, query: Query, pagination: Pagination) -> Result<(Vec<Activity>, i64), Error>
where
    S: Store,
{
    let total = ActivityCommon::count(db, &query).await?;
    let activities = ActivityCommon::query(db, &query, Some(pagination)).await?;
    Ok((activities, total))
}

/// Newest first; readable by any active member.
pub async fn organisation_activity<S>(db: &mut S, user_id: i32, organisation_id: i32, pagination: Pagination) -> Result<(Vec<Activity>, i64), Error>
where
    S: Store,
{
    require_member(db, organisation_id, user_id).await?;
    let query = Query {
        subject_type_eq: Some(ORGANISATION_LOG),
        subject_id_eq: Some(organisation_id),
        ..default::default()
    };
    paged(db, query, pagination).await
}

/// Changes the user made themselves, across organisations.
pub async fn user_activity<S>(db: &mut S, user_id: i32, pagination: Pagination) -> Result<(Vec<Activity>, i64), Error>
where
    S: Store,
{
    let query = Query {
        causer_id_eq: Some(user_id),
        ..default::default()
    };
    paged(db, query, pagination).await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::models::member::{MemberInvite, Role, RoleUpdate};
    use crate::core::models::organisation::OrganisationUpdate;
    use crate::core::permission::test::StaticGrants;
    use crate::core::ports::repository::Manager;
    use crate::core::services::fixture;
    use crate::core::services::member::{invite_member, update_role};
    use crate::core::services::organisation::update_organisation;
    use crate::database::memory::MemoryManager;

    fn events(activities: &[Activity]) -> Vec<&str> {
        activities.iter().map(|a| a.event.as_str()).collect()
    }

    #[tokio::test]
    async fn test_organisation_changes_are_logged() {
        let manager = MemoryManager::new();
        let ada = manager.add_user("Ada", "ada@example.com", false);
        let bob = manager.add_user("Bob", "bob@example.com", false);
        let cy = manager.add_user("Cy", "cy@example.com", false);
        let org = fixture::organisation(&manager, ada, "Choir", None).await;

        let rename: OrganisationUpdate = serde_json::from_value(serde_json::json!({ "name": "Chamber Choir" })).unwrap();
        update_organisation(manager.tx().await.unwrap(), &StaticGrants, ada, org, rename).await.unwrap();
        let invite = MemberInvite {
            email: "bob@example.com".into(),
            role: Role::Viewer,
            permissions: None,
        };
        invite_member(manager.tx().await.unwrap(), &StaticGrants, ada, org, invite).await.unwrap();
        update_role(manager.tx().await.unwrap(), &StaticGrants, ada, org, bob, RoleUpdate { role: Role::Editor }).await.unwrap();

        let mut db = manager.db().await.unwrap();
        let (activities, total) = organisation_activity(&mut db, ada, org, Pagination::page(1, 10)).await.unwrap();
        assert_eq!(total, 4);
        assert_eq!(events(&activities), vec!["member_role_updated", "member_invited", "updated", "created"]);
        assert_eq!(activities[0].properties.0["old_role"], "viewer");
        assert_eq!(activities[0].properties.0["new_role"], "editor");
        assert_eq!(activities[1].properties.0["user_id"], bob);
        assert_eq!(activities[2].properties.0["old"]["name"], "Choir");
        assert_eq!(activities[2].properties.0["attributes"]["name"], "Chamber Choir");
        assert!(activities.iter().all(|a| a.causer_id == Some(ada) && a.log_name == "organisation"));

        let (page, total) = organisation_activity(&mut db, ada, org, Pagination::page(2, 3)).await.unwrap();
        assert_eq!((events(&page), total), (vec!["created"], 4));

        let res = organisation_activity(&mut db, cy, org, Pagination::page(1, 10)).await;
        assert!(matches!(res, Err(Error::Unauthorized)));
        let res = organisation_activity(&mut db, bob, org, Pagination::page(1, 10)).await;
        assert!(matches!(res, Err(Error::Unauthorized)));

        let (mine, _) = user_activity(&mut db, ada, Pagination::page(1, 10)).await.unwrap();
        assert_eq!(mine.len(), 4);
        assert!(user_activity(&mut db, bob, Pagination::page(1, 10)).await.unwrap().0.is_empty());
    }

    #[tokio::test]
    async fn test_failed_change_logs_nothing() {
        let manager = MemoryManager::new();
        let ada = manager.add_user("Ada", "ada@example.com", false);
        let bob = manager.add_user("Bob", "bob@example.com", false);
        let org = fixture::organisation(&manager, ada, "Choir", None).await;
        fixture::member(&manager, org, bob, Role::Viewer).await;

        let rename: OrganisationUpdate = serde_json::from_value(serde_json::json!({ "name": "Mine" })).unwrap();
        let res = update_organisation(manager.tx().await.unwrap(), &StaticGrants, bob, org, rename).await;
        assert!(matches!(res, Err(Error::Unauthorized)));
        let mut db = manager.db().await.unwrap();
        let (activities, _) = organisation_activity(&mut db, bob, org, Pagination::page(1, 10)).await.unwrap();
        assert_eq!(events(&activities), vec!["created"]);
    }
}

use std::collections::{HashSet, VecDeque};

use crate::core::models::organisation::{HierarchyRow, Query as OrganisationQuery, Related};
use crate::core::ports::repository::{HierarchyCommon, OrganisationCommon, Store};
use crate::error::Error;

/// Closure rows of `id` given the closure rows of its parent.
pub fn closure_for(id: i32, parent_rows: &[HierarchyRow]) -> Vec<HierarchyRow> {
    let mut rows = Vec::with_capacity(parent_rows.len() + 1);
    rows.push(HierarchyRow {
        ancestor_id: id,
        descendant_id: id,
        depth: 0,
    });
    rows.extend(parent_rows.iter().map(|r| HierarchyRow {
        ancestor_id: r.ancestor_id,
        descendant_id: id,
        depth: r.depth + 1,
    }));
    rows
}

/// Rejects `parent_id` when it is the organisation itself or one of its descendants.
pub async fn ensure_acyclic<S>(store: &mut S, id: i32, parent_id: i32) -> Result<(), Error>
where
    S: Store,
{
    if id == parent_id || HierarchyCommon::is_descendant(store, id, parent_id).await? {
        return Err(Error::BusinessError("an organisation cannot be nested under itself or its descendants".into()));
    }
    Ok(())
}

/// Rebuilds the closure rows of `id` and then of every organisation below it,
/// parents always before their children.
pub async fn rebuild_hierarchy<S>(store: &mut S, id: i32) -> Result<(), Error>
where
    S: Store,
{
    let mut queue = VecDeque::from([id]);
    let mut visited = HashSet::new();
    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        let org = OrganisationCommon::get(store, current).await?;
        let parent_rows = match org.parent_id {
            Some(parent_id) => HierarchyCommon::ancestor_rows(store, parent_id).await?,
            None => Vec::new(),
        };
        HierarchyCommon::delete_rows(store, current).await?;
        HierarchyCommon::insert_rows(store, &closure_for(current, &parent_rows)).await?;
        let children = OrganisationCommon::query(
            store,
            &OrganisationQuery {
                parent_id_eq: Some(current),
                ..default::default()
            },
        )
        .await?;
        queue.extend(children.into_iter().map(|c| c.id).filter(|c| !visited.contains(c)));
    }
    Ok(())
}

/// Deepest ancestor; `None` for a top-level organisation.
pub fn root_of(ancestors: Vec<Related>) -> Option<Related> {
    ancestors.into_iter().filter(|r| r.depth > 0).max_by_key(|r| r.depth)
}

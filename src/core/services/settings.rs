use uuid::Uuid;
use validator::Validate;

use crate::core::models::settings::{FormSettings, SettingsUpdate};
use crate::core::permission::{Permission, RoleGrants};
use crate::core::ports::repository::{SettingsCommon, Store, TxStore};
use crate::core::services::access::require_owner_permission;
use crate::core::services::form::authorized_form;
use crate::error::Error;

/// Returns the form's settings, storing the defaults on first access.
pub async fn get_settings<S, G>(db: &mut S, grants: &G, user_id: i32, code: Uuid) -> Result<FormSettings, Error>
where
    S: Store,
    G: RoleGrants,
{
    let form = authorized_form(db, grants, user_id, code, Permission::FormsEdit).await?;
    if let Some(settings) = SettingsCommon::get(db, form.id).await? {
        return Ok(settings);
    }
    let settings = FormSettings::defaults(form.id);
    SettingsCommon::upsert(db, &settings).await?;
    Ok(settings)
}

pub async fn update_settings<T, G>(mut tx: T, grants: &G, user_id: i32, code: Uuid, update: SettingsUpdate) -> Result<FormSettings, Error>
where
    T: TxStore,
    G: RoleGrants,
{
    update.validate()?;
    if let (Some(open_at), Some(close_at)) = (update.open_at, update.close_at) {
        if close_at < open_at {
            return Err(Error::field("close_at", "must not be before open_at"));
        }
    }
    let form = authorized_form(&mut tx, grants, user_id, code, Permission::FormsEdit).await?;
    let current = SettingsCommon::get(&mut tx, form.id).await?.unwrap_or_else(|| FormSettings::defaults(form.id));
    if update.changes_publishing(&current) {
        require_owner_permission(&mut tx, grants, form.owner(), user_id, Permission::FormsPublish).await?;
    }
    let next = current.apply(update);
    SettingsCommon::upsert(&mut tx, &next).await?;
    tx.commit().await?;
    Ok(next)
}

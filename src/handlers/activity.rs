use actix_web::web::{Data, Json, Path, Query};

use crate::context::UserInfo;
use crate::core::models::activity::Activity;
use crate::core::models::common::Pagination as Page;
use crate::core::ports::repository::Manager;
use crate::core::services::activity::{organisation_activity, user_activity};
use crate::error::Error;
use crate::request::Pagination;
use crate::response::List;

pub async fn organisation<M>(user_info: UserInfo, id: Path<i32>, Query(Pagination { page, size }): Query<Pagination>, manager: Data<M>) -> Result<Json<List<Activity>>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let (activities, total) = organisation_activity(&mut db, user_info.id, id.into_inner(), Page::page(page, size)).await?;
    Ok(Json(List::new(activities, total)))
}

pub async fn mine<M>(user_info: UserInfo, Query(Pagination { page, size }): Query<Pagination>, manager: Data<M>) -> Result<Json<List<Activity>>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let (activities, total) = user_activity(&mut db, user_info.id, Page::page(page, size)).await?;
    Ok(Json(List::new(activities, total)))
}

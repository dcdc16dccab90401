use actix_web::web::{Data, Json, Path};
use actix_web::HttpResponse;

use crate::context::UserInfo;
use crate::core::models::member::{MemberDetail, MemberInvite, OwnershipTransfer, PermissionsUpdate, RoleUpdate};
use crate::core::models::organisation::Organisation;
use crate::core::ports::repository::Manager;
use crate::core::services::member::{accept_invitation, invite_member, list_members, remove_member, transfer_ownership, update_permissions as set_permissions, update_role as set_role};
use crate::error::Error;
use crate::privilege::casbin::RolePolicy;
use crate::response::{CreateResponse, DeleteResponse, List};

pub async fn list<M>(user_info: UserInfo, id: Path<i32>, manager: Data<M>) -> Result<Json<List<MemberDetail>>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let members = list_members(&mut db, user_info.id, id.into_inner()).await?;
    let total = members.len() as i64;
    Ok(Json(List::new(members, total)))
}

pub async fn invite<M>(user_info: UserInfo, id: Path<i32>, Json(body): Json<MemberInvite>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<CreateResponse<i32>>, Error>
where
    M: Manager + 'static,
{
    let member = invite_member(manager.tx().await?, policy.get_ref(), user_info.id, id.into_inner(), body).await?;
    Ok(Json(CreateResponse { id: member.id }))
}

pub async fn accept<M>(user_info: UserInfo, id: Path<i32>, manager: Data<M>) -> Result<HttpResponse, Error>
where
    M: Manager + 'static,
{
    accept_invitation(manager.tx().await?, user_info.id, id.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn remove<M>(user_info: UserInfo, path: Path<(i32, i32)>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<DeleteResponse>, Error>
where
    M: Manager + 'static,
{
    let (id, target) = path.into_inner();
    remove_member(manager.tx().await?, policy.get_ref(), user_info.id, id, target).await?;
    Ok(Json(DeleteResponse::new(1)))
}

pub async fn update_role<M>(user_info: UserInfo, path: Path<(i32, i32)>, Json(body): Json<RoleUpdate>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<HttpResponse, Error>
where
    M: Manager + 'static,
{
    let (id, target) = path.into_inner();
    set_role(manager.tx().await?, policy.get_ref(), user_info.id, id, target, body).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn update_permissions<M>(
    user_info: UserInfo,
    path: Path<(i32, i32)>,
    Json(body): Json<PermissionsUpdate>,
    manager: Data<M>,
    policy: Data<RolePolicy>,
) -> Result<HttpResponse, Error>
where
    M: Manager + 'static,
{
    let (id, target) = path.into_inner();
    set_permissions(manager.tx().await?, policy.get_ref(), user_info.id, id, target, body).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn transfer<M>(user_info: UserInfo, id: Path<i32>, Json(body): Json<OwnershipTransfer>, manager: Data<M>) -> Result<Json<Organisation>, Error>
where
    M: Manager + 'static,
{
    let org = transfer_ownership(manager.tx().await?, user_info.id, id.into_inner(), body).await?;
    Ok(Json(org))
}

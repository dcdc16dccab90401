use actix_web::web::{Data, Json, Path, Query};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::context::UserInfo;
use crate::core::models::common::Pagination as Page;
use crate::core::models::gdpr::{
    AccessRequest, AccessRequestCreate, ActorType, AuditFilter, AuditLog, ComplianceReport, ConsentCreate, Origin, PendingRequests, Rejection, ReportPeriod, RequestCompleted,
    RetentionPolicyCreate, UserExport,
};
use crate::core::ports::repository::Manager;
use crate::core::services::gdpr::{
    audit_trail, complete_request, compliance_report, create_request, download as download_export, erase_user, export_user_data, pending_requests, record_consent,
    reject_request, set_retention_policy,
};
use crate::error::Error;
use crate::request::Pagination;
use crate::response::{CreateResponse, DeleteResponse, List};

#[derive(Debug, Deserialize)]
pub struct Erasure {
    pub reason: Option<String>,
}

pub async fn consent<M>(user_info: UserInfo, origin: Origin, Json(body): Json<ConsentCreate>, manager: Data<M>) -> Result<Json<CreateResponse<i32>>, Error>
where
    M: Manager + 'static,
{
    let id = record_consent(manager.tx().await?, user_info.id, body, origin).await?;
    Ok(Json(CreateResponse { id }))
}

pub async fn export<M>(user_info: UserInfo, origin: Origin, manager: Data<M>) -> Result<Json<UserExport>, Error>
where
    M: Manager + 'static,
{
    let export = export_user_data(manager.tx().await?, user_info.id, origin).await?;
    Ok(Json(export))
}

pub async fn request<M>(user_info: UserInfo, Json(body): Json<AccessRequestCreate>, manager: Data<M>) -> Result<Json<CreateResponse<i32>>, Error>
where
    M: Manager + 'static,
{
    let request = create_request(manager.tx().await?, user_info.id, body, Utc::now()).await?;
    Ok(Json(CreateResponse { id: request.id }))
}

pub async fn pending<M>(user_info: UserInfo, manager: Data<M>) -> Result<Json<PendingRequests>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let queue = pending_requests(&mut db, user_info.id, Utc::now()).await?;
    Ok(Json(queue))
}

pub async fn complete<M>(user_info: UserInfo, origin: Origin, id: Path<i32>, manager: Data<M>) -> Result<Json<RequestCompleted>, Error>
where
    M: Manager + 'static,
{
    let completed = complete_request(manager.tx().await?, user_info.id, id.into_inner(), Utc::now(), origin).await?;
    Ok(Json(completed))
}

pub async fn reject<M>(user_info: UserInfo, origin: Origin, id: Path<i32>, Json(body): Json<Rejection>, manager: Data<M>) -> Result<Json<AccessRequest>, Error>
where
    M: Manager + 'static,
{
    let rejected = reject_request(manager.tx().await?, user_info.id, id.into_inner(), body, Utc::now(), origin).await?;
    Ok(Json(rejected))
}

pub async fn download<M>(token: Path<String>, manager: Data<M>) -> Result<Json<Value>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let data = download_export(&mut db, &token.into_inner(), Utc::now()).await?;
    Ok(Json(data))
}

pub async fn erase<M>(user_info: UserInfo, origin: Origin, Query(Erasure { reason }): Query<Erasure>, manager: Data<M>) -> Result<Json<DeleteResponse>, Error>
where
    M: Manager + 'static,
{
    let deleted = erase_user(manager.tx().await?, user_info.id, ActorType::User, reason, origin).await?;
    Ok(Json(DeleteResponse::new(deleted)))
}

pub async fn retention_policy<M>(user_info: UserInfo, Json(body): Json<RetentionPolicyCreate>, manager: Data<M>) -> Result<Json<CreateResponse<i32>>, Error>
where
    M: Manager + 'static,
{
    let policy = set_retention_policy(manager.tx().await?, user_info.id, body, Utc::now()).await?;
    Ok(Json(CreateResponse { id: policy.id }))
}

pub async fn audit_logs<M>(
    user_info: UserInfo,
    Query(filter): Query<AuditFilter>,
    Query(Pagination { page, size }): Query<Pagination>,
    manager: Data<M>,
) -> Result<Json<List<AuditLog>>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let (logs, total) = audit_trail(&mut db, user_info.id, filter, Page::page(page, size)).await?;
    Ok(Json(List::new(logs, total)))
}

pub async fn report<M>(user_info: UserInfo, Query(period): Query<ReportPeriod>, manager: Data<M>) -> Result<Json<ComplianceReport>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let report = compliance_report(&mut db, user_info.id, period, Utc::now()).await?;
    Ok(Json(report))
}

use actix_web::web::{Data, Json, Path, Query};
use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::context::UserInfo;
use crate::core::models::common::Pagination as Page;
use crate::core::models::submission::{AnswersSave, Submission, SubmissionDetail};
use crate::core::ports::repository::Manager;
use crate::core::services::submission::{delete_submission, get_submission, list_submissions, open_submission, review_submission, save_answers};
use crate::error::Error;
use crate::impls::notifier::logger::LogNotifier;
use crate::privilege::casbin::RolePolicy;
use crate::request::Pagination;
use crate::response::{DeleteResponse, List};

pub async fn open<M>(user_info: Option<UserInfo>, code: Path<Uuid>, manager: Data<M>, config: Data<Config>) -> Result<Json<SubmissionDetail>, Error>
where
    M: Manager + 'static,
{
    let detail = open_submission(
        manager.tx().await?,
        user_info.map(|u| u.id),
        code.into_inner(),
        Utc::now(),
        config.default_retention_days,
    )
    .await?;
    Ok(Json(detail))
}

pub async fn detail<M>(user_info: Option<UserInfo>, code: Path<Uuid>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<SubmissionDetail>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let detail = get_submission(&mut db, policy.get_ref(), user_info.map(|u| u.id), code.into_inner()).await?;
    Ok(Json(detail))
}

pub async fn save<M>(
    user_info: Option<UserInfo>,
    code: Path<Uuid>,
    Json(body): Json<AnswersSave>,
    manager: Data<M>,
    notifier: Data<LogNotifier>,
) -> Result<Json<SubmissionDetail>, Error>
where
    M: Manager + 'static,
{
    let detail = save_answers(manager.tx().await?, notifier.get_ref(), user_info.map(|u| u.id), code.into_inner(), body, Utc::now()).await?;
    Ok(Json(detail))
}

pub async fn list<M>(
    user_info: UserInfo,
    code: Path<Uuid>,
    Query(Pagination { page, size }): Query<Pagination>,
    manager: Data<M>,
    policy: Data<RolePolicy>,
) -> Result<Json<List<Submission>>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let (list, total) = list_submissions(&mut db, policy.get_ref(), user_info.id, code.into_inner(), Page::page(page, size)).await?;
    Ok(Json(List::new(list, total)))
}

pub async fn delete<M>(user_info: UserInfo, code: Path<Uuid>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<DeleteResponse>, Error>
where
    M: Manager + 'static,
{
    delete_submission(manager.tx().await?, policy.get_ref(), user_info.id, code.into_inner()).await?;
    Ok(Json(DeleteResponse::new(1)))
}

pub async fn review<M>(user_info: UserInfo, code: Path<Uuid>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<Submission>, Error>
where
    M: Manager + 'static,
{
    let submission = review_submission(manager.tx().await?, policy.get_ref(), user_info.id, code.into_inner()).await?;
    Ok(Json(submission))
}

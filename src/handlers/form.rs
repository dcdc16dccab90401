use actix_web::web::{Data, Json, Path, Query};
use actix_web::HttpResponse;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::context::UserInfo;
use crate::core::models::common::Pagination as Page;
use crate::core::models::form::{Form, FormCreate, FormUpdate, FormView};
use crate::core::models::schema::{SchemaSave, SectionWithFields};
use crate::core::models::settings::{FormSettings, SettingsUpdate};
use crate::core::ports::repository::Manager;
use crate::core::services::form::{create_form, delete_form, get_form, list_forms, respondent_view, update_form, RespondentView};
use crate::core::services::schema::{get_schema, save_schema as store_schema};
use crate::core::services::settings::{get_settings, update_settings as store_settings};
use crate::error::Error;
use crate::privilege::casbin::RolePolicy;
use crate::request::Pagination;
use crate::response::{CreateResponse, DeleteResponse, List};

#[derive(Debug, Deserialize)]
pub struct FormFilter {
    pub organisation_id: Option<i32>,
}

pub async fn list<M>(
    user_info: UserInfo,
    Query(Pagination { page, size }): Query<Pagination>,
    Query(filter): Query<FormFilter>,
    manager: Data<M>,
) -> Result<Json<List<FormView>>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let (forms, total) = list_forms(&mut db, user_info.id, filter.organisation_id, Page::page(page, size), Utc::now()).await?;
    Ok(Json(List::new(forms, total)))
}

pub async fn create<M>(user_info: UserInfo, Json(body): Json<FormCreate>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<CreateResponse<Uuid>>, Error>
where
    M: Manager + 'static,
{
    let form = create_form(manager.tx().await?, policy.get_ref(), user_info.id, body).await?;
    Ok(Json(CreateResponse { id: form.code }))
}

pub async fn detail<M>(user_info: UserInfo, code: Path<Uuid>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<FormView>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let view = get_form(&mut db, policy.get_ref(), user_info.id, code.into_inner(), Utc::now()).await?;
    Ok(Json(view))
}

pub async fn update<M>(user_info: UserInfo, code: Path<Uuid>, Json(body): Json<FormUpdate>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<Form>, Error>
where
    M: Manager + 'static,
{
    let form = update_form(manager.tx().await?, policy.get_ref(), user_info.id, code.into_inner(), body).await?;
    Ok(Json(form))
}

pub async fn delete<M>(user_info: UserInfo, code: Path<Uuid>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<DeleteResponse>, Error>
where
    M: Manager + 'static,
{
    delete_form(manager.tx().await?, policy.get_ref(), user_info.id, code.into_inner()).await?;
    Ok(Json(DeleteResponse::new(1)))
}

pub async fn schema<M>(user_info: UserInfo, code: Path<Uuid>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<Vec<SectionWithFields>>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let sections = get_schema(&mut db, policy.get_ref(), user_info.id, code.into_inner()).await?;
    Ok(Json(sections))
}

pub async fn save_schema<M>(
    user_info: UserInfo,
    code: Path<Uuid>,
    Json(body): Json<SchemaSave>,
    manager: Data<M>,
    policy: Data<RolePolicy>,
) -> Result<Json<Vec<SectionWithFields>>, Error>
where
    M: Manager + 'static,
{
    let sections = store_schema(manager.tx().await?, policy.get_ref(), user_info.id, code.into_inner(), body).await?;
    Ok(Json(sections))
}

pub async fn settings<M>(user_info: UserInfo, code: Path<Uuid>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<FormSettings>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let settings = get_settings(&mut db, policy.get_ref(), user_info.id, code.into_inner()).await?;
    Ok(Json(settings))
}

pub async fn update_settings<M>(
    user_info: UserInfo,
    code: Path<Uuid>,
    Json(body): Json<SettingsUpdate>,
    manager: Data<M>,
    policy: Data<RolePolicy>,
) -> Result<Json<FormSettings>, Error>
where
    M: Manager + 'static,
{
    let settings = store_settings(manager.tx().await?, policy.get_ref(), user_info.id, code.into_inner(), body).await?;
    Ok(Json(settings))
}

/// Public view of a published form.
pub async fn respondent<M>(code: Path<Uuid>, manager: Data<M>) -> Result<HttpResponse, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let view: RespondentView = respondent_view(&mut db, code.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(view))
}

use actix_web::web::{Data, Json, Path, Query};
use serde::Deserialize;
use uuid::Uuid;

use crate::context::UserInfo;
use crate::core::models::template::{FormFromTemplate, RatingCreate, RatingSummary, Search, Template, TemplateCreate, TemplateUpdate};
use crate::core::ports::repository::Manager;
use crate::core::services::template::{create_template, delete_template, form_from_template, list_templates, rate_template, search_templates, update_template};
use crate::error::Error;
use crate::privilege::casbin::RolePolicy;
use crate::response::{CreateResponse, DeleteResponse, List};

/// Template creation naming its source form in the body.
#[derive(Debug, Deserialize)]
pub struct TemplateFromForm {
    pub form_code: Uuid,
    #[serde(flatten)]
    pub template: TemplateCreate,
}

/// `?q=` switches from the usable list to a search over public and own templates.
pub async fn list<M>(user_info: UserInfo, search: Query<Search>, manager: Data<M>) -> Result<Json<List<Template>>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let templates = match search.into_inner().q.filter(|q| !q.trim().is_empty()) {
        Some(q) => search_templates(&mut db, user_info.id, &q).await?,
        None => list_templates(&mut db, user_info.id).await?,
    };
    let total = templates.len() as i64;
    Ok(Json(List::new(templates, total)))
}

pub async fn create<M>(user_info: UserInfo, code: Path<Uuid>, Json(body): Json<TemplateCreate>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<CreateResponse<i32>>, Error>
where
    M: Manager + 'static,
{
    let template = create_template(manager.tx().await?, policy.get_ref(), user_info.id, code.into_inner(), body).await?;
    Ok(Json(CreateResponse { id: template.id }))
}

pub async fn create_from_body<M>(user_info: UserInfo, Json(body): Json<TemplateFromForm>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<CreateResponse<i32>>, Error>
where
    M: Manager + 'static,
{
    let template = create_template(manager.tx().await?, policy.get_ref(), user_info.id, body.form_code, body.template).await?;
    Ok(Json(CreateResponse { id: template.id }))
}

pub async fn instantiate<M>(user_info: UserInfo, id: Path<i32>, Json(body): Json<FormFromTemplate>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<CreateResponse<Uuid>>, Error>
where
    M: Manager + 'static,
{
    let form = form_from_template(manager.tx().await?, policy.get_ref(), user_info.id, id.into_inner(), body).await?;
    Ok(Json(CreateResponse { id: form.code }))
}

pub async fn update<M>(user_info: UserInfo, id: Path<i32>, Json(body): Json<TemplateUpdate>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<Template>, Error>
where
    M: Manager + 'static,
{
    let template = update_template(manager.tx().await?, policy.get_ref(), user_info.id, id.into_inner(), body).await?;
    Ok(Json(template))
}

pub async fn rate<M>(user_info: UserInfo, id: Path<i32>, Json(body): Json<RatingCreate>, manager: Data<M>) -> Result<Json<RatingSummary>, Error>
where
    M: Manager + 'static,
{
    let summary = rate_template(manager.tx().await?, user_info.id, id.into_inner(), body).await?;
    Ok(Json(summary))
}

pub async fn delete<M>(user_info: UserInfo, id: Path<i32>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<DeleteResponse>, Error>
where
    M: Manager + 'static,
{
    delete_template(manager.tx().await?, policy.get_ref(), user_info.id, id.into_inner()).await?;
    Ok(Json(DeleteResponse::new(1)))
}

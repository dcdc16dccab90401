use actix_web::web::{Data, Json, Path, Query};
use chrono::Utc;

use crate::context::UserInfo;
use crate::core::models::common::Pagination as Page;
use crate::core::models::form::FormView;
use crate::core::models::organisation::{Organisation, OrganisationCreate, OrganisationUpdate, Related};
use crate::core::ports::repository::Manager;
use crate::core::services::form::list_forms;
use crate::core::services::organisation::{ancestors as load_ancestors, create_organisation, delete_organisation, descendants as load_descendants, get_organisation, list_organisations, root as load_root, update_organisation};
use crate::error::Error;
use crate::privilege::casbin::RolePolicy;
use crate::request::Pagination;
use crate::response::{CreateResponse, DeleteResponse, List};

pub async fn list<M>(user_info: UserInfo, manager: Data<M>) -> Result<Json<List<Organisation>>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let orgs = list_organisations(&mut db, user_info.id).await?;
    let total = orgs.len() as i64;
    Ok(Json(List::new(orgs, total)))
}

pub async fn create<M>(user_info: UserInfo, Json(body): Json<OrganisationCreate>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<CreateResponse<i32>>, Error>
where
    M: Manager + 'static,
{
    let org = create_organisation(manager.tx().await?, policy.get_ref(), user_info.id, body).await?;
    Ok(Json(CreateResponse { id: org.id }))
}

pub async fn detail<M>(user_info: UserInfo, id: Path<i32>, manager: Data<M>) -> Result<Json<Organisation>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let org = get_organisation(&mut db, user_info.id, id.into_inner()).await?;
    Ok(Json(org))
}

pub async fn update<M>(user_info: UserInfo, id: Path<i32>, Json(body): Json<OrganisationUpdate>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<Organisation>, Error>
where
    M: Manager + 'static,
{
    let org = update_organisation(manager.tx().await?, policy.get_ref(), user_info.id, id.into_inner(), body).await?;
    Ok(Json(org))
}

pub async fn delete<M>(user_info: UserInfo, id: Path<i32>, manager: Data<M>, policy: Data<RolePolicy>) -> Result<Json<DeleteResponse>, Error>
where
    M: Manager + 'static,
{
    delete_organisation(manager.tx().await?, policy.get_ref(), user_info.id, id.into_inner()).await?;
    Ok(Json(DeleteResponse::new(1)))
}

pub async fn ancestors<M>(user_info: UserInfo, id: Path<i32>, manager: Data<M>) -> Result<Json<Vec<Related>>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    Ok(Json(load_ancestors(&mut db, user_info.id, id.into_inner()).await?))
}

pub async fn descendants<M>(user_info: UserInfo, id: Path<i32>, manager: Data<M>) -> Result<Json<Vec<Related>>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    Ok(Json(load_descendants(&mut db, user_info.id, id.into_inner()).await?))
}

pub async fn root<M>(user_info: UserInfo, id: Path<i32>, manager: Data<M>) -> Result<Json<Related>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    Ok(Json(load_root(&mut db, user_info.id, id.into_inner()).await?))
}

pub async fn forms<M>(user_info: UserInfo, id: Path<i32>, Query(Pagination { page, size }): Query<Pagination>, manager: Data<M>) -> Result<Json<List<FormView>>, Error>
where
    M: Manager + 'static,
{
    let mut db = manager.db().await?;
    let (forms, total) = list_forms(&mut db, user_info.id, Some(id.into_inner()), Page::page(page, size), Utc::now()).await?;
    Ok(Json(List::new(forms, total)))
}

#[cfg(test)]
mod test {
    use actix_web::http::StatusCode;
    use actix_web::test::{call_and_read_body_json, call_service, TestRequest};
    use serde_json::{json, Value};

    use crate::database::memory::MemoryManager;
    use crate::handlers::test::bearer;

    #[actix_web::test]
    async fn test_nested_organisations() {
        let manager = MemoryManager::new();
        let ada = manager.add_user("Ada", "ada@example.com", false);
        let bob = manager.add_user("Bob", "bob@example.com", false);
        let app = test_app!(manager);

        let req = TestRequest::post()
            .uri("/organisations")
            .insert_header(bearer(ada))
            .set_json(json!({ "name": "Northside School", "type": "school" }))
            .to_request();
        let school: Value = call_and_read_body_json(&app, req).await;
        let school = school["id"].as_i64().unwrap();

        let req = TestRequest::post()
            .uri("/organisations")
            .insert_header(bearer(ada))
            .set_json(json!({ "name": "Year 7", "parent_id": school }))
            .to_request();
        let year: Value = call_and_read_body_json(&app, req).await;
        let year = year["id"].as_i64().unwrap();

        let req = TestRequest::get().uri(&format!("/organisations/{}/ancestors", year)).insert_header(bearer(ada)).to_request();
        let ancestors: Value = call_and_read_body_json(&app, req).await;
        assert_eq!(ancestors[0]["slug"], "northside-school");
        assert_eq!(ancestors[0]["depth"], 1);

        let req = TestRequest::put()
            .uri(&format!("/organisations/{}", school))
            .insert_header(bearer(ada))
            .set_json(json!({ "parent_id": year }))
            .to_request();
        assert_eq!(call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = TestRequest::delete().uri(&format!("/organisations/{}", school)).insert_header(bearer(ada)).to_request();
        assert_eq!(call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = TestRequest::get().uri(&format!("/organisations/{}", school)).insert_header(bearer(bob)).to_request();
        assert_eq!(call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = TestRequest::get().uri("/organisations").insert_header(bearer(ada)).to_request();
        let list: Value = call_and_read_body_json(&app, req).await;
        assert_eq!(list["total"], 2);
    }
}

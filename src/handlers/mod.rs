#[cfg(test)]
macro_rules! test_app {
    ($manager:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($manager.clone()))
                .app_data(actix_web::web::Data::new(crate::privilege::casbin::RolePolicy::new().await.unwrap()))
                .app_data(actix_web::web::Data::new(crate::impls::notifier::logger::LogNotifier))
                .app_data(actix_web::web::Data::new(crate::handlers::test::config()))
                .configure(|cfg| crate::handlers::routes::<crate::database::memory::MemoryManager>(cfg, crate::handlers::test::SECRET)),
        )
        .await
    };
}

pub mod activity;
pub mod form;
pub mod gdpr;
pub mod member;
pub mod organisation;
pub mod submission;
pub mod template;

use actix_web::web::{delete, get, post, put, resource, scope, ServiceConfig};

use crate::core::ports::repository::Manager;
use crate::middlewares::jwt::JWTMiddleware;

pub fn routes<M>(cfg: &mut ServiceConfig, secret: &[u8])
where
    M: Manager + 'static,
{
    cfg.service(resource("gdpr/downloads/{token}").route(get().to(gdpr::download::<M>)))
        .service(
            scope("f")
                .wrap(JWTMiddleware::optional(secret.to_vec()))
                .route("{code}", get().to(form::respondent::<M>))
                .route("{code}/submissions", post().to(submission::open::<M>)),
        )
        .service(
            scope("submissions")
                .wrap(JWTMiddleware::optional(secret.to_vec()))
                .route("{code}", get().to(submission::detail::<M>))
                .route("{code}", put().to(submission::save::<M>))
                .route("{code}", delete().to(submission::delete::<M>))
                .route("{code}/review", put().to(submission::review::<M>)),
        )
        .service(
            scope("")
                .wrap(JWTMiddleware::required(secret.to_vec()))
                .route("activity", get().to(activity::mine::<M>))
                .service(
                    scope("forms")
                        .route("", get().to(form::list::<M>))
                        .route("", post().to(form::create::<M>))
                        .route("{code}", get().to(form::detail::<M>))
                        .route("{code}", put().to(form::update::<M>))
                        .route("{code}", delete().to(form::delete::<M>))
                        .route("{code}/schema", get().to(form::schema::<M>))
                        .route("{code}/schema", put().to(form::save_schema::<M>))
                        .route("{code}/settings", get().to(form::settings::<M>))
                        .route("{code}/settings", put().to(form::update_settings::<M>))
                        .route("{code}/submissions", get().to(submission::list::<M>))
                        .route("{code}/templates", post().to(template::create::<M>)),
                )
                .service(
                    scope("organisations")
                        .route("", get().to(organisation::list::<M>))
                        .route("", post().to(organisation::create::<M>))
                        .route("{id}", get().to(organisation::detail::<M>))
                        .route("{id}", put().to(organisation::update::<M>))
                        .route("{id}", delete().to(organisation::delete::<M>))
                        .route("{id}/ancestors", get().to(organisation::ancestors::<M>))
                        .route("{id}/descendants", get().to(organisation::descendants::<M>))
                        .route("{id}/root", get().to(organisation::root::<M>))
                        .route("{id}/forms", get().to(organisation::forms::<M>))
                        .route("{id}/activity", get().to(activity::organisation::<M>))
                        .route("{id}/transfer", post().to(member::transfer::<M>))
                        .route("{id}/members", get().to(member::list::<M>))
                        .route("{id}/members", post().to(member::invite::<M>))
                        .route("{id}/members/accept", post().to(member::accept::<M>))
                        .route("{id}/members/{user_id}", put().to(member::update_role::<M>))
                        .route("{id}/members/{user_id}", delete().to(member::remove::<M>))
                        .route("{id}/members/{user_id}/permissions", put().to(member::update_permissions::<M>)),
                )
                .service(
                    scope("templates")
                        .route("", get().to(template::list::<M>))
                        .route("", post().to(template::create_from_body::<M>))
                        .route("{id}", put().to(template::update::<M>))
                        .route("{id}", delete().to(template::delete::<M>))
                        .route("{id}/forms", post().to(template::instantiate::<M>))
                        .route("{id}/ratings", post().to(template::rate::<M>)),
                )
                .service(
                    scope("gdpr")
                        .route("consents", post().to(gdpr::consent::<M>))
                        .route("export", get().to(gdpr::export::<M>))
                        .route("account", delete().to(gdpr::erase::<M>))
                        .route("requests", get().to(gdpr::pending::<M>))
                        .route("requests", post().to(gdpr::request::<M>))
                        .route("requests/{id}/complete", post().to(gdpr::complete::<M>))
                        .route("requests/{id}/reject", post().to(gdpr::reject::<M>))
                        .route("retention-policies", post().to(gdpr::retention_policy::<M>))
                        .route("audit-logs", get().to(gdpr::audit_logs::<M>))
                        .route("report", get().to(gdpr::report::<M>)),
                ),
        );
}

#![allow(async_fn_in_trait)]

mod config;
mod context;
mod core;
mod database;
mod error;
mod handlers;
mod impls;
mod middlewares;
mod privilege;
mod request;
mod response;

use actix_web::middleware::Logger;
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;
use crate::core::ports::repository::{Manager, UserCommon};
use crate::core::services::gdpr::apply_retention_policies;
use crate::database::sqlx::PgSqlxManager;
use crate::impls::notifier::logger::LogNotifier;
use crate::impls::tokener::jwt::JWT;
use crate::privilege::casbin::RolePolicy;

#[derive(Parser)]
#[command(name = "formhub", about = "Form building and submission collection service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Delete submissions past their retention date
    ApplyRetention {
        /// Report what would be deleted without deleting it
        #[arg(long)]
        dry_run: bool,
    },
    /// Print a bearer token for an existing user
    IssueToken {
        user_id: i32,
        /// Lifetime of the token in hours
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

async fn serve(config: Config, manager: PgSqlxManager) -> anyhow::Result<()> {
    let policy = Data::new(RolePolicy::new().await?);
    let notifier = Data::new(LogNotifier);
    let secret = config.jwt_secret.clone().into_bytes();
    let address = (config.bind_address.clone(), config.port);
    let config = Data::new(config);
    let manager = Data::new(manager);
    log::info!("listening on {}:{}", address.0, address.1);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(manager.clone())
            .app_data(policy.clone())
            .app_data(notifier.clone())
            .app_data(config.clone())
            .configure(|cfg| handlers::routes::<PgSqlxManager>(cfg, &secret))
    })
    .bind(address)?
    .run()
    .await?;
    Ok(())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info,actix_web=info")).init();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    let manager = PgSqlxManager::new(pool);
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, manager).await,
        Command::ApplyRetention { dry_run } => {
            let sweep = apply_retention_policies(manager.tx().await?, Utc::now(), dry_run).await?;
            log::info!("retention sweep removed {} submissions (dry run: {})", sweep.submission_ids.len(), sweep.dry_run);
            Ok(())
        }
        Command::IssueToken { user_id, hours } => {
            let user = UserCommon::get(&mut manager.db().await?, user_id).await?;
            let token = JWT::new(config.jwt_secret.into_bytes()).issue(user.id, Duration::hours(hours))?;
            log::info!("issued a {} hour token for user {}", hours, user.id);
            println!("{}", token);
            Ok(())
        }
    }
}

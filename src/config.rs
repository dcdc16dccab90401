use crate::error::Error;

pub static DATABASE_URL: &str = "DATABASE_URL";
pub static JWT_SECRET: &str = "JWT_SECRET";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub bind_address: String,
    pub port: u16,
    pub max_connections: u32,
    pub default_retention_days: i64,
}

fn var_or(key: &str, default: &str) -> String {
    dotenv::var(key).unwrap_or_else(|_| default.to_owned())
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Ok(Self {
            database_url: dotenv::var(DATABASE_URL)?,
            jwt_secret: dotenv::var(JWT_SECRET)?,
            bind_address: var_or("BIND_ADDRESS", "0.0.0.0"),
            port: var_or("PORT", "8000").parse()?,
            max_connections: var_or("DATABASE_MAX_CONNECTIONS", "5").parse()?,
            default_retention_days: var_or("DEFAULT_RETENTION_DAYS", "365").parse()?,
        })
    }
}

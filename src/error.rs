use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::collections::BTreeMap;
use std::num;
use thiserror::Error as ThisError;

/// Messages keyed by the offending field, rendered as-is to the caller.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("dotenv error: {0}")]
    DotEnvError(#[from] dotenv::Error),

    #[error("jwt error: {0}")]
    JWTError(#[from] jsonwebtoken::errors::Error),

    #[error("policy error: {0}")]
    PolicyError(#[from] casbin::Error),

    #[error("invalid input")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("invalid fields")]
    InvalidFields(FieldErrors),

    #[error("business error: {0}")]
    BusinessError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("unauthorized")]
    Unauthorized,

    #[error("parse int error: {0}")]
    ParseIntError(#[from] num::ParseIntError),

    #[error("server error: {0}")]
    ServerError(String),
}

impl Error {
    pub fn field(name: &str, message: &str) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(name.to_owned(), vec![message.to_owned()]);
        Error::InvalidFields(errors)
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::DatabaseError(sqlx::Error::RowNotFound) | Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ValidationError(_) | Error::InvalidFields(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::BusinessError(_) => StatusCode::CONFLICT,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Unauthorized => StatusCode::FORBIDDEN,
            Error::ParseIntError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = match self {
            Error::ValidationError(errors) => json!({ "message": "invalid input", "fields": errors }),
            Error::InvalidFields(errors) => json!({ "message": "invalid input", "fields": errors }),
            Error::BusinessError(msg) => json!({ "message": msg }),
            Error::DatabaseError(sqlx::Error::RowNotFound) => json!({ "message": "not found" }),
            Error::NotFound(what) => json!({ "message": format!("{} not found", what) }),
            _ if status.is_server_error() => {
                log::error!("{}", self);
                json!({ "message": "internal server error" })
            }
            _ => json!({ "message": self.to_string() }),
        };
        HttpResponse::build(status).json(body)
    }
}

use actix_web::dev::{Service, ServiceRequest, Transform};
use actix_web::error::ErrorUnauthorized;
use actix_web::{Error, HttpMessage};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

use crate::context::UserInfo;
use crate::core::ports::tokener::{Payload, Tokener};
use crate::impls::tokener::jwt::JWT;

#[derive(Debug, Deserialize, Serialize)]
pub struct Claim {
    pub user: String,
    pub exp: i64,
}

impl Claim {
    pub fn new(user_id: i32, ttl: Duration) -> Self {
        Self {
            user: user_id.to_string(),
            exp: (Utc::now() + ttl).timestamp(),
        }
    }
}

impl Payload for Claim {
    fn user(&self) -> &str {
        &self.user
    }
}

fn bearer(req: &ServiceRequest) -> Result<Option<String>, Error> {
    let Some(header) = req.headers().get("Authorization") else {
        return Ok(None);
    };
    let value = header.to_str().map_err(ErrorUnauthorized)?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value);
    Ok(Some(token.trim().to_owned()))
}

/// Resolves the bearer token into a [`UserInfo`] extension. Optional mode lets
/// requests without a token through as guests; a bad token is refused either way.
pub(crate) struct JWTMiddleware {
    secret: Vec<u8>,
    optional: bool,
}

impl JWTMiddleware {
    pub fn required(secret: Vec<u8>) -> Self {
        Self { secret, optional: false }
    }

    pub fn optional(secret: Vec<u8>) -> Self {
        Self { secret, optional: true }
    }
}

impl<S> Transform<S, ServiceRequest> for JWTMiddleware
where
    S: Service<ServiceRequest> + 'static,
    S::Future: 'static,
    S::Error: Into<Error>,
{
    type Error = Error;
    type Response = S::Response;
    type Transform = JWTService<S>;
    type InitError = ();
    type Future = Pin<Box<dyn Future<Output = Result<Self::Transform, Self::InitError>>>>;
    fn new_transform(&self, service: S) -> Self::Future {
        let secret = self.secret.clone();
        let optional = self.optional;
        Box::pin(async move {
            Ok(JWTService {
                tokener: JWT::new(secret),
                optional,
                next_service: service,
            })
        })
    }
}

pub struct JWTService<S> {
    tokener: JWT,
    optional: bool,
    next_service: S,
}

impl<S> JWTService<S> {
    fn identify(&self, req: &ServiceRequest) -> Result<Option<UserInfo>, Error> {
        let token = match bearer(req)? {
            Some(token) => token,
            None if self.optional => return Ok(None),
            None => return Err(ErrorUnauthorized("no token in header")),
        };
        let claim: Claim = <JWT as Tokener<Claim>>::verify_token(&self.tokener, &token).map_err(ErrorUnauthorized)?;
        let id = claim.user().parse::<i32>().map_err(ErrorUnauthorized)?;
        Ok(Some(UserInfo { id }))
    }
}

impl<S> Service<ServiceRequest> for JWTService<S>
where
    S: Service<ServiceRequest>,
    S::Future: 'static,
    S::Error: Into<Error>,
{
    type Response = S::Response;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;
    fn poll_ready(&self, ctx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.next_service.poll_ready(ctx).map_err(|e| e.into())
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        match self.identify(&req) {
            Err(e) => return Box::pin(async move { Err(e) }),
            Ok(Some(user)) => {
                req.extensions_mut().insert(user);
            }
            Ok(None) => {}
        }
        let res_fut = self.next_service.call(req);
        Box::pin(async move {
            let resp = res_fut.await.map_err(|e| e.into())?;
            Ok(resp)
        })
    }
}

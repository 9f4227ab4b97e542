use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;

use crate::error::AppError;
use crate::middleware::auth_context::CurrentUser;
use crate::models::user::Role;

const FORBIDDEN: &str = "You don't have a permission to perform this task";

/// Passes when the caller's role is one of `allowed`.
pub fn authorize(role: Role, allowed: &[Role]) -> Result<(), AppError> {
    if allowed.contains(&role) {
        Ok(())
    } else {
        Err(AppError::unauthorized(FORBIDDEN))
    }
}

/// Restricts a route to the given roles. Must run inside `AuthMiddleware`.
pub struct RequireRole {
    allowed: Rc<[Role]>,
}

impl RequireRole {
    pub fn new(allowed: &[Role]) -> Self {
        RequireRole {
            allowed: Rc::from(allowed),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireRole
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RequireRoleService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequireRoleService {
            service,
            allowed: Rc::clone(&self.allowed),
        }))
    }
}

pub struct RequireRoleService<S> {
    service: S,
    allowed: Rc<[Role]>,
}

impl<S, B> Service<ServiceRequest> for RequireRoleService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let role = req.extensions().get::<CurrentUser>().map(CurrentUser::role);

        let verdict = match role {
            Some(role) => authorize(role, &self.allowed),
            None => Err(AppError::unauthorized("logging to continue")),
        };

        match verdict {
            Ok(()) => {
                let fut = self.service.call(req);
                Box::pin(async move { Ok(fut.await?.map_into_left_body()) })
            }
            Err(err) => {
                log::debug!("role check failed for {}: {:?}", req.path(), role);
                Box::pin(async move { Ok(req.error_response(err).map_into_right_body()) })
            }
        }
    }
}

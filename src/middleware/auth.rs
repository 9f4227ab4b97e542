use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, HttpMessage,
};
use bson::doc;
use futures::future::LocalBoxFuture;

use crate::app::AppState;
use crate::db::store::{and_filter, Model};
use crate::error::AppError;
use crate::middleware::auth_context::CurrentUser;
use crate::models::user::User;
use crate::services::token_service::COOKIE_NAME;

const NOT_LOGGED_IN: &str = "logging to continue";
const UNKNOWN_USER: &str = "This user are not belong to this token! try login again";
const PASSWORD_CHANGED: &str = "Password changed! Please login";

/// Loads the user a session token belongs to.
///
/// Fails when the token is absent or invalid, when the user was removed or
/// deactivated, and when the password changed after the token was issued.
pub async fn resolve_identity(state: &AppState, token: Option<&str>) -> Result<User, AppError> {
    let token = token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::unauthorized(NOT_LOGGED_IN))?;
    let claims = state.tokens.verify(token)?;
    let id = bson::oid::ObjectId::parse_str(&claims.id)
        .map_err(|_| AppError::unauthorized(UNKNOWN_USER))?;

    let filter = and_filter(User::default_filter(), doc! {"_id": id});
    let user = state
        .users()
        .find_one(filter, &["role"])
        .await?
        .ok_or_else(|| AppError::unauthorized(UNKNOWN_USER))?;

    if user.password_changed_after(claims.iat) {
        return Err(AppError::unauthorized(PASSWORD_CHANGED));
    }
    Ok(user)
}

/// Authenticates every request of the wrapped scope from the `jwt` cookie.
pub struct AuthMiddleware;

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);

        Box::pin(async move {
            let token = req.cookie(COOKIE_NAME).map(|cookie| cookie.value().to_string());
            let identity = match req.app_data::<web::Data<AppState>>() {
                Some(state) => resolve_identity(state, token.as_deref()).await,
                None => Err(AppError::Internal("application state is not registered".into())),
            };

            match identity {
                Ok(user) => {
                    log::debug!("authenticated {} for {}", user.email, req.path());
                    req.extensions_mut().insert(CurrentUser(user));
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                Err(err) => {
                    log::debug!("rejected {}: {}", req.path(), err);
                    Ok(req.error_response(err).map_into_right_body())
                }
            }
        })
    }
}

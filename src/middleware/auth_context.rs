use std::future::{ready, Ready};

use actix_web::{dev::Payload, Error, FromRequest, HttpMessage, HttpRequest};
use bson::oid::ObjectId;

use crate::error::AppError;
use crate::models::user::{Role, User};

/// The identity `AuthMiddleware` resolved for this request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn id(&self) -> Result<ObjectId, AppError> {
        self.0
            .id
            .ok_or_else(|| AppError::Internal("authenticated user has no id".into()))
    }

    pub fn role(&self) -> Role {
        self.0.role()
    }
}

impl FromRequest for CurrentUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        match req.extensions().get::<CurrentUser>() {
            Some(user) => ready(Ok(user.clone())),
            None => ready(Err(AppError::unauthorized("logging to continue").into())),
        }
    }
}

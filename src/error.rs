use actix_web::{
    body::MessageBody,
    dev::ServiceResponse,
    http::StatusCode,
    middleware::ErrorHandlerResponse,
    web, HttpRequest, HttpResponse, ResponseError,
};
use mongodb::error::ErrorKind;
use serde_json::json;

use crate::app::AppState;
use crate::services::email_service::EmailError;

const TOKEN_MESSAGE: &str = "token expire or invalid! try logging again";
const OPAQUE_MESSAGE: &str = "something wrong happen";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Raised deliberately by a handler; surfaced to the client verbatim.
    #[error("{message}")]
    Operational { status: StatusCode, message: String },

    #[error("invalid {field}: {value}")]
    Cast { field: String, value: String },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("{0}")]
    Database(#[from] mongodb::error::Error),

    #[error("{0}")]
    Email(#[from] EmailError),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn new(message: impl Into<String>, status: StatusCode) -> Self {
        AppError::Operational {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::BAD_REQUEST)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::UNAUTHORIZED)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::NOT_FOUND)
    }

    pub fn cast(field: impl Into<String>, value: impl Into<String>) -> Self {
        AppError::Cast {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Duplicate keys and any other rejection reported by the server itself.
    fn is_server_rejection(err: &mongodb::error::Error) -> bool {
        matches!(err.kind.as_ref(), ErrorKind::Write(_) | ErrorKind::Command(_))
    }

    /// Normalised `(status, message)` pair sent to clients.
    pub fn normalize(&self) -> (StatusCode, String) {
        match self {
            AppError::Operational { status, message } => (*status, message.clone()),
            AppError::Cast { .. } => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Validation(message) => (StatusCode::FORBIDDEN, message.clone()),
            AppError::Token(_) => (StatusCode::UNAUTHORIZED, TOKEN_MESSAGE.to_string()),
            AppError::Database(err) if Self::is_server_rejection(err) => {
                (StatusCode::CONFLICT, err.to_string())
            }
            AppError::Database(_) | AppError::Email(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, OPAQUE_MESSAGE.to_string())
            }
        }
    }

    /// The `source()` chain, outermost first.
    pub fn trace(&self) -> Vec<String> {
        let mut trace = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            trace.push(err.to_string());
            source = err.source();
        }
        trace
    }
}

pub fn status_label(status: StatusCode) -> &'static str {
    if status.is_client_error() {
        "fail"
    } else {
        "error"
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.normalize().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, message) = self.normalize();
        if status.is_server_error() {
            log::error!("{:?}", self);
        }

        HttpResponse::build(status).json(json!({
            "status": status_label(status),
            "message": message,
        }))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("password hashing failed: {}", err))
    }
}

impl From<bson::ser::Error> for AppError {
    fn from(err: bson::ser::Error) -> Self {
        AppError::Internal(format!("bson serialization failed: {}", err))
    }
}

impl From<bson::de::Error> for AppError {
    fn from(err: bson::de::Error) -> Self {
        AppError::Internal(format!("bson deserialization failed: {}", err))
    }
}

/// Fallback for requests that matched no route.
pub async fn not_found(req: HttpRequest) -> Result<HttpResponse, AppError> {
    Err(AppError::not_found(format!("No APi URl found {}", req.uri())))
}

/// Rewrites `AppError` responses with full diagnostics when running in development mode.
pub fn diagnostics<B: MessageBody>(
    res: ServiceResponse<B>,
) -> actix_web::Result<ErrorHandlerResponse<B>> {
    let development = res
        .request()
        .app_data::<web::Data<AppState>>()
        .map(|state| !state.config.is_production())
        .unwrap_or(false);

    let status = res.status();
    let body = match res.response().error().and_then(|e| e.as_error::<AppError>()) {
        Some(err) if development => Some(json!({
            "status": status_label(status),
            "message": err.to_string(),
            "stack": err.trace(),
            "error": format!("{:?}", err),
        })),
        _ => None,
    };
    let Some(body) = body else {
        return Ok(ErrorHandlerResponse::Response(res.map_into_left_body()));
    };

    let (req, _) = res.into_parts();
    let response = HttpResponse::build(status).json(body);
    Ok(ErrorHandlerResponse::Response(
        ServiceResponse::new(req, response).map_into_right_body(),
    ))
}

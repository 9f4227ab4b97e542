use std::future::Future;

use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse};
use bson::{doc, oid::ObjectId, DateTime};
use serde_json::{json, Value};
use validator::Validate;

use crate::app::AppState;
use crate::db::json::render_all;
use crate::db::store::{and_filter, Model};
use crate::error::AppError;
use crate::middleware::auth_context::CurrentUser;
use crate::models::user::{
    hash_reset_token, password_update, ForgotPassword, NewPassword, ResetToken, SignIn, SignUp,
    UpdateMe, User, UserInput,
};
use crate::routes::factory::{self, IdParam};
use crate::services::api_features::{parse_query_string, QueryFeatures};
use crate::services::email_service::{Mail, Mailer};

/// Sets the session cookie for `id` and answers with `status`.
fn send_token(
    state: &AppState,
    id: &ObjectId,
    status: StatusCode,
) -> Result<HttpResponse, AppError> {
    let token = state.tokens.issue(id)?;
    Ok(HttpResponse::build(status)
        .cookie(state.tokens.cookie(token))
        .json(json!({"status": "success"})))
}

pub async fn signup(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    let input = SignUp::from_body(body.into_inner())?;
    let user = User::register(input, state.config.salt_rounds).await?;
    let id = state.users().insert(&user).await?;
    log::info!("new user {} signed up", id);

    send_token(&state, &id, StatusCode::CREATED)
}

pub async fn signin(
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    let input: SignIn = serde_json::from_value(body.into_inner())
        .ok()
        .filter(|input: &SignIn| input.validate().is_ok())
        .ok_or_else(|| AppError::bad_request("Please provide email or password correct"))?;

    let filter = and_filter(
        User::default_filter(),
        doc! {"email": input.email.trim().to_lowercase()},
    );
    let user = state.users().find_one(filter, &["password"]).await?;

    let incorrect = || AppError::unauthorized("Incorrect Email or Password");
    let user = user.ok_or_else(incorrect)?;
    if !user.correct_password(&input.password).await? {
        return Err(incorrect());
    }
    let id = user.id.ok_or_else(incorrect)?;

    send_token(&state, &id, StatusCode::OK)
}

pub async fn change_password(
    state: web::Data<AppState>,
    current: CurrentUser,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    let id = current.id()?;
    let body = body.into_inner();
    let current_password = body
        .get("currentPassword")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let wrong = || AppError::bad_request("Your current Password is wrong");
    let user = state
        .users()
        .find_one(doc! {"_id": id}, &["password"])
        .await?
        .ok_or_else(wrong)?;
    if !user.correct_password(&current_password).await? {
        return Err(wrong());
    }

    let input = NewPassword::from_body(body)?;
    let update = password_update(input, state.config.salt_rounds).await?;
    state.users().update_by_id(id, doc! {"$set": update}).await?;
    log::info!("user {} changed their password", id);

    Ok(HttpResponse::Ok().json(json!({"status": "success", "message": "password is changed"})))
}

fn reset_message(url: &str) -> String {
    format!(
        "forget your password? submit a patch request with your new password and password confirm to: {}.\n\
         If you did't forget your password, please ignore this message",
        url
    )
}

/// Sends `mail`, running `rollback` before reporting a delivery failure.
async fn deliver_or_rollback<F, Fut>(
    mailer: &dyn Mailer,
    mail: Mail,
    rollback: F,
) -> Result<(), AppError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), AppError>>,
{
    let to = mail.to.clone();
    if let Err(err) = mailer.send(mail).await {
        log::error!("reset mail to {} failed: {}", to, err);
        rollback().await?;
        return Err(err.into());
    }
    Ok(())
}

pub async fn forget_password(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ForgotPassword>,
) -> Result<HttpResponse, AppError> {
    let email = body.email.trim().to_lowercase();
    let user = state
        .users()
        .find_one(doc! {"email": email.as_str()}, &[])
        .await?
        .ok_or_else(|| AppError::not_found("No User found"))?;
    let id = user
        .id
        .ok_or_else(|| AppError::Internal("stored user has no id".into()))?;

    let token = ResetToken::generate();
    let users = state.users();
    users
        .update_by_id(
            id,
            doc! {"$set": {
                "passwordResetToken": token.hashed.as_str(),
                "passwordResetExpires": token.expires,
            }},
        )
        .await?;

    let url = {
        let info = req.connection_info();
        format!(
            "{}://{}/user/resetPassword/{}",
            info.scheme(),
            info.host(),
            token.plain
        )
    };
    let mail = Mail {
        to: user.email.clone(),
        subject: "reset Password! valid for 10 minute".to_string(),
        text: reset_message(&url),
    };

    deliver_or_rollback(state.mailer.as_ref(), mail, || {
        users.update_by_id(
            id,
            doc! {"$unset": {"passwordResetToken": "", "passwordResetExpires": ""}},
        )
    })
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "reset link send your email address",
    })))
}

pub async fn reset_password(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<Value>,
) -> Result<HttpResponse, AppError> {
    let hashed = hash_reset_token(&path.into_inner());
    let user = state
        .users()
        .find_one(
            doc! {
                "passwordResetToken": hashed,
                "passwordResetExpires": {"$gt": DateTime::now()},
            },
            &[],
        )
        .await?
        .ok_or_else(|| AppError::bad_request("token is expire or invalid"))?;
    let id = user
        .id
        .ok_or_else(|| AppError::Internal("stored user has no id".into()))?;

    let input = NewPassword::from_body(body.into_inner())?;
    let update = password_update(input, state.config.salt_rounds).await?;
    state
        .users()
        .update_by_id(
            id,
            doc! {
                "$set": update,
                "$unset": {"passwordResetToken": "", "passwordResetExpires": ""},
            },
        )
        .await?;

    send_token(&state, &id, StatusCode::OK)
}

pub async fn get_me(
    state: web::Data<AppState>,
    current: CurrentUser,
) -> Result<HttpResponse, AppError> {
    let id = current.id()?;
    factory::get_one::<User>(&state.db, &id.to_hex(), &[]).await
}

pub async fn get_all_users(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let query = QueryFeatures::new(parse_query_string(req.query_string()))
        .filter()
        .sort()
        .fields()
        .pagination()
        .build();
    let users = state.users().find(&query).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "result": users.len(),
        "data": render_all::<User>(users),
    })))
}

pub async fn update_me(
    state: web::Data<AppState>,
    current: CurrentUser,
    body: web::Json<UpdateMe>,
) -> Result<HttpResponse, AppError> {
    let id = current.id()?;
    state
        .users()
        .find_by_id_and_update(&id.to_hex(), body.into_inner().into_patch())
        .await?;

    Ok(HttpResponse::Ok().json(json!({"status": "success"})))
}

/// Deactivates the caller's account; it disappears from default reads.
pub async fn delete_me(
    state: web::Data<AppState>,
    current: CurrentUser,
) -> Result<HttpResponse, AppError> {
    let id = current.id()?;
    state
        .users()
        .update_by_id(id, doc! {"$set": {"active": false, "updatedAt": DateTime::now()}})
        .await?;
    log::info!("user {} deactivated their account", id);

    Ok(HttpResponse::Ok().json(json!({"status": "success", "message": "Account deleted"})))
}

pub async fn get_user(
    state: web::Data<AppState>,
    path: web::Path<IdParam>,
) -> Result<HttpResponse, AppError> {
    factory::get_one::<User>(&state.db, &path.id, &[]).await
}

pub async fn update_user(
    state: web::Data<AppState>,
    path: web::Path<IdParam>,
    body: web::Json<serde_json::Map<String, Value>>,
) -> Result<HttpResponse, AppError> {
    let patch = factory::patch_document(body.into_inner())?;
    factory::update_one::<User>(&state.db, &path.id, patch).await
}

pub async fn delete_user(
    state: web::Data<AppState>,
    path: web::Path<IdParam>,
) -> Result<HttpResponse, AppError> {
    factory::delete_one::<User>(&state.db, &path.id).await
}

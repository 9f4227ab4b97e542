use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{
    body::MessageBody,
    dev::{ServiceFactory, ServiceRequest, ServiceResponse},
    error::InternalError,
    middleware::{DefaultHeaders, ErrorHandlers, NormalizePath},
    web, App, Error, HttpResponse,
};
use mongodb::Database;
use serde_json::json;

use crate::config::AppConfig;
use crate::db::store::Store;
use crate::error;
use crate::middleware::{auth::AuthMiddleware, rate_limit::RateLimiter, role_auth::RequireRole};
use crate::models::{review::Review, tour::Tour, user::Role, user::User};
use crate::routes::{reviews, tours, users};
use crate::services::{email_service::Mailer, token_service::TokenService};

const JSON_LIMIT: usize = 5 * 1024 * 1024;

/// Shared, read-only state handed to every handler.
pub struct AppState {
    pub db: Database,
    pub config: Arc<AppConfig>,
    pub tokens: TokenService,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(db: Database, config: AppConfig, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            tokens: TokenService::new(&config),
            db,
            config: Arc::new(config),
            mailer,
        }
    }

    pub fn tours(&self) -> Store<Tour> {
        Store::new(&self.db)
    }

    pub fn users(&self) -> Store<User> {
        Store::new(&self.db)
    }

    pub fn reviews(&self) -> Store<Review> {
        Store::new(&self.db)
    }
}

/// Malformed or oversized JSON bodies are client errors.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_LIMIT)
        .error_handler(|err, _req| {
            let message = err.to_string();
            let response = HttpResponse::BadRequest().json(json!({
                "status": "fail",
                "message": message,
            }));
            InternalError::from_response(err, response).into()
        })
}

fn review_routes(cfg: &mut web::ServiceConfig) {
    let authors = || RequireRole::new(&[Role::User, Role::Admin]);

    cfg.service(
        web::resource("")
            .route(web::get().to(reviews::get_reviews))
            .route(web::post().to(reviews::create_review).wrap(authors())),
    )
    .service(
        web::resource("/{id}")
            .route(web::get().to(reviews::get_review))
            .route(web::patch().to(reviews::update_review).wrap(authors()))
            .route(web::delete().to(reviews::delete_review).wrap(authors())),
    );
}

/// Registers every route of the API.
pub fn configure(cfg: &mut web::ServiceConfig) {
    let staff = || RequireRole::new(&[Role::Admin, Role::LeadGuide, Role::Guide]);

    cfg.service(
        web::scope("/user")
            .route("/signup", web::post().to(users::signup))
            .route("/signin", web::post().to(users::signin))
            .route("/forgetPassword", web::post().to(users::forget_password))
            .route("/resetPassword/{token}", web::patch().to(users::reset_password))
            .service(
                web::scope("")
                    .wrap(AuthMiddleware)
                    .route("/changePassword", web::patch().to(users::change_password))
                    .route("/me", web::get().to(users::get_me))
                    .service(
                        web::scope("")
                            .wrap(RequireRole::new(&[Role::Admin]))
                            .service(
                                web::resource("")
                                    .route(web::get().to(users::get_all_users))
                                    .route(web::patch().to(users::update_me))
                                    .route(web::delete().to(users::delete_me)),
                            )
                            .service(
                                web::resource("/{id}")
                                    .route(web::get().to(users::get_user))
                                    .route(web::patch().to(users::update_user))
                                    .route(web::delete().to(users::delete_user)),
                            ),
                    ),
            ),
    )
    .service(
        web::scope("/tours")
            .route("/top5-tours", web::get().to(tours::top_tours))
            .route("/stats", web::get().to(tours::get_tour_stats))
            .route("/plan/{year}", web::get().to(tours::get_monthly_plan))
            .service(
                web::scope("")
                    .wrap(AuthMiddleware)
                    .service(web::scope("/{tourId}/reviews").configure(review_routes))
                    .service(
                        web::resource("")
                            .route(web::get().to(tours::get_tours))
                            .route(web::post().to(tours::create_tour).wrap(staff())),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(tours::get_tour))
                            .route(web::patch().to(tours::update_tour).wrap(staff()))
                            .route(web::delete().to(tours::delete_tour).wrap(staff())),
                    ),
            ),
    )
    .service(
        web::scope("/review")
            .wrap(AuthMiddleware)
            .configure(review_routes),
    );
}

/// The full application: global middleware, routes and the not-found fallback.
pub fn create_app(
    state: web::Data<AppState>,
    limiter: RateLimiter,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = Error,
        InitError = (),
    >,
> {
    App::new()
        .app_data(state)
        .app_data(json_config())
        .wrap(limiter)
        .wrap(ErrorHandlers::new().default_handler(error::diagnostics))
        .wrap(NormalizePath::trim())
        .wrap(
            DefaultHeaders::new()
                .add(("X-Content-Type-Options", "nosniff"))
                .add(("X-Frame-Options", "SAMEORIGIN"))
                .add(("Referrer-Policy", "no-referrer")),
        )
        .wrap(Cors::permissive())
        .configure(configure)
        .default_service(web::to(error::not_found))
}

use std::{sync::Arc, time::Duration};

use actix_web::{middleware::Logger, web, HttpServer};
use env_logger::Env;

use tour_api::{
    app::{create_app, AppState},
    config::AppConfig,
    db,
    middleware::rate_limit::RateLimiter,
    services::email_service::HttpMailer,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    if cfg!(debug_assertions) {
        dotenv::dotenv().ok();
    } else {
        log::info!("Release mode");
    }

    let config = AppConfig::from_env()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let (host, port) = (config.host.clone(), config.port);

    let client = db::mongo::create_mongo_client(&config.mongo_uri)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let database = client.database(&config.db_name);
    db::mongo::ping(&database).await;
    if let Err(e) = db::mongo::ensure_indexes(&database).await {
        log::warn!("Failed to ensure indexes: {}", e);
    }

    let limiter = RateLimiter::new(
        config.rate_limit_max,
        Duration::from_secs(config.rate_limit_window_secs),
    );
    let mailer = Arc::new(HttpMailer::new(config.mail.clone()));
    let state = web::Data::new(AppState::new(database, config, mailer));

    log::info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        create_app(state.clone(), limiter.clone()).wrap(Logger::default())
    })
    .bind((host, port))?
    .run()
    .await
}

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use actix_web::{
    body::MessageBody,
    cookie::Cookie,
    dev::{ServiceFactory, ServiceRequest, ServiceResponse},
    web, App,
};
use bson::{doc, oid::ObjectId};
use serde_json::{json, Map, Value};

use tour_api::{
    app::{create_app, AppState},
    config::{AppConfig, MailConfig, Mode},
    db::mongo::ensure_indexes,
    middleware::rate_limit::RateLimiter,
    models::{
        tour::{NewTour, Tour},
        user::{SignUp, User},
    },
    services::email_service::{EmailError, HttpMailer, Mail, Mailer},
};

pub const TEST_SECRET: &str = "test-secret-do-not-use";

// The driver connects lazily, so requests rejected before any query never need a server.
const LAZY_MONGO_URI: &str = "mongodb://127.0.0.1:27017/?serverSelectionTimeoutMS=500";
const LIVE_DB_NAME: &str = "tour_api_live_test";

pub fn test_config(mode: Mode) -> AppConfig {
    AppConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        mongo_uri: LAZY_MONGO_URI.to_string(),
        db_name: "tour_api_test".to_string(),
        jwt_secret: TEST_SECRET.to_string(),
        jwt_expires_in: chrono::Duration::hours(1),
        cookie_expire_days: 1,
        mode,
        salt_rounds: 4,
        mail: MailConfig {
            host: None,
            user: None,
            password: None,
            from: "test@example.com".to_string(),
        },
        rate_limit_max: 1000,
        rate_limit_window_secs: 600,
    }
}

pub struct TestApp {
    pub state: web::Data<AppState>,
    pub limiter: RateLimiter,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config(Mode::Production)).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let mailer = Arc::new(HttpMailer::new(config.mail.clone()));
        Self::with_mailer(config, mailer).await
    }

    pub async fn with_mailer(config: AppConfig, mailer: Arc<dyn Mailer>) -> Self {
        let client = mongodb::Client::with_uri_str(&config.mongo_uri)
            .await
            .expect("lazy mongo client");
        let database = client.database(&config.db_name);
        let limiter = RateLimiter::new(
            config.rate_limit_max,
            Duration::from_secs(config.rate_limit_window_secs),
        );

        Self {
            state: web::Data::new(AppState::new(database, config, mailer)),
            limiter,
        }
    }

    pub fn create_app(
        &self,
    ) -> App<
        impl ServiceFactory<
            ServiceRequest,
            Config = (),
            Response = ServiceResponse<impl MessageBody>,
            Error = actix_web::Error,
            InitError = (),
        >,
    > {
        create_app(self.state.clone(), self.limiter.clone())
    }

    /// An app on an empty MongoDB database, or `None` when no server answers.
    ///
    /// Set `MONGODB_URI` to point these tests at a server other than localhost.
    pub async fn live(mailer: Option<Arc<dyn Mailer>>) -> Option<Self> {
        let mut config = test_config(Mode::Production);
        config.mongo_uri = std::env::var("MONGODB_URI").unwrap_or_else(|_| {
            "mongodb://localhost:27017/?serverSelectionTimeoutMS=1000".to_string()
        });
        config.db_name = LIVE_DB_NAME.to_string();

        let mailer: Arc<dyn Mailer> = match mailer {
            Some(mailer) => mailer,
            None => Arc::new(HttpMailer::new(config.mail.clone())),
        };
        let test_app = Self::with_mailer(config, mailer).await;
        if let Err(e) = test_app.state.db.run_command(doc! {"ping": 1}).await {
            eprintln!("skipping: MongoDB is not reachable ({})", e);
            return None;
        }

        test_app.state.db.drop().await.expect("reset test database");
        ensure_indexes(&test_app.state.db).await.expect("create indexes");
        Some(test_app)
    }

    pub async fn insert_user(&self, email: &str) -> ObjectId {
        let input: SignUp = serde_json::from_value(json!({
            "firstName": "Test",
            "lastName": "User",
            "email": email,
            "password": get_test_password(),
            "confirmPassword": get_test_password()
        }))
        .expect("sign-up body");
        let user = User::register(input, self.state.config.salt_rounds)
            .await
            .expect("register user");
        self.state.users().insert(&user).await.expect("insert user")
    }

    pub async fn insert_tour(&self, name: &str, secret: bool) -> ObjectId {
        let mut body = tour_body();
        body.insert("name".into(), Value::from(name));
        body.insert("secretTour".into(), Value::from(secret));
        let input: NewTour = serde_json::from_value(Value::Object(body)).expect("tour body");
        let tour = Tour::from_input(input).expect("valid tour");
        self.state.tours().insert(&tour).await.expect("insert tour")
    }

    /// Session cookie for a user id that does not need to exist.
    pub fn session_cookie(&self, id: &ObjectId) -> Cookie<'static> {
        let token = self.state.tokens.issue(id).expect("token");
        self.state.tokens.cookie(token)
    }
}

pub fn get_test_email() -> String {
    "test@example.com".to_string()
}

pub fn get_test_password() -> String {
    "testpassword123".to_string()
}

/// A complete tour creation body.
pub fn tour_body() -> Map<String, Value> {
    json!({
        "name": "The Forest Hiker",
        "price": 397,
        "duration": 5,
        "maxGroupSize": 25,
        "difficulty": "easy",
        "summary": "Breathtaking hike through the Canadian Banff National Park",
        "imageCover": "tour-1-cover.jpg",
        "images": ["tour-1-1.jpg", "tour-1-2.jpg"],
        "startDates": ["2021-04-25T09:00:00.000Z", "2021-07-20"]
    })
    .as_object()
    .cloned()
    .expect("tour body is an object")
}

/// A mail transport that is always down.
pub struct RejectingMailer;

#[async_trait::async_trait]
impl Mailer for RejectingMailer {
    async fn send(&self, _mail: Mail) -> Result<(), EmailError> {
        Err(EmailError::Api {
            status: 503,
            body: "mail service unavailable".to_string(),
        })
    }
}

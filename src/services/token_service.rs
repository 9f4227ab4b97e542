use actix_web::cookie::{time, Cookie, SameSite};
use bson::oid::ObjectId;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::AppError;

pub const COOKIE_NAME: &str = "jwt";
const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub id: String, // user id
    pub iat: i64,   // issued at
    pub exp: i64,   // expiration time
}

#[derive(Clone)]
pub struct TokenService {
    header: Header,
    validation: Validation,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expires_in: Duration,
    cookie_days: i64,
    secure: bool,
}

impl TokenService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_secret(
            &config.jwt_secret,
            config.jwt_expires_in,
            config.cookie_expire_days,
            config.is_production(),
        )
    }

    pub fn with_secret(secret: &str, expires_in: Duration, cookie_days: i64, secure: bool) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            header: Header::new(Algorithm::HS256),
            validation,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expires_in,
            cookie_days,
            secure,
        }
    }

    pub fn issue(&self, user_id: &ObjectId) -> Result<String, AppError> {
        let now = Utc::now();
        let expires = now
            .checked_add_signed(self.expires_in)
            .ok_or_else(|| AppError::Internal("token lifetime out of range".into()))?;
        self.sign(&Claims {
            id: user_id.to_hex(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
        })
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        Ok(encode(&self.header, claims, &self.encoding_key)?)
    }

    /// Fails when the token is tampered with, expired or malformed.
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        Ok(decode::<Claims>(token, &self.decoding_key, &self.validation)?.claims)
    }

    pub fn cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build(COOKIE_NAME, token)
            .path("/")
            .http_only(true)
            .same_site(SameSite::Strict)
            .secure(self.secure)
            .max_age(time::Duration::seconds(
                self.cookie_days.saturating_mul(SECONDS_PER_DAY),
            ))
            .finish()
    }
}

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, DateTime, Document};
use chrono::{Duration, Utc};
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use validator::Validate;

use crate::db::store::Model;
use crate::error::AppError;

const RESET_TOKEN_TTL_MINUTES: i64 = 10;
/// `passwordChangeAt` is backdated so a token issued right after the change stays valid.
const PASSWORD_CHANGE_SKEW_MS: i64 = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    User,
    Admin,
    LeadGuide,
    Guide,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    // Always hashed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_change_at: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_reset_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_reset_expires: Option<DateTime>,
    pub created_at: Option<DateTime>,
    pub updated_at: Option<DateTime>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignUp {
    #[validate(length(min = 1, message = "first name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "last name is required"))]
    pub last_name: String,
    #[validate(email(message = "email is invalid"))]
    pub email: String,
    pub photo: Option<String>,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Password not same"))]
    pub confirm_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignIn {
    #[validate(email)]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPassword {
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewPassword {
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Password not same"))]
    pub confirm_password: String,
}

/// Message reported when a required user field is absent.
fn required_message(field: &str) -> &'static str {
    match field {
        "firstName" => "first name is required",
        "lastName" => "last name is required",
        "email" => "email is required",
        _ => "password is must",
    }
}

/// A user request body whose absent fields fail like schema validation.
pub trait UserInput: DeserializeOwned {
    const REQUIRED: &'static [&'static str];

    fn from_body(body: Value) -> Result<Self, AppError> {
        let missing: Vec<String> = Self::REQUIRED
            .iter()
            .filter(|field| body.get(**field).map_or(true, Value::is_null))
            .map(|field| format!("{}: {}", field, required_message(field)))
            .collect();
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "User validation failed: {}",
                missing.join(", ")
            )));
        }

        serde_json::from_value(body)
            .map_err(|err| AppError::Validation(format!("User validation failed: {}", err)))
    }
}

impl UserInput for SignUp {
    const REQUIRED: &'static [&'static str] =
        &["firstName", "lastName", "email", "password", "confirmPassword"];
}

impl UserInput for NewPassword {
    const REQUIRED: &'static [&'static str] = &["password", "confirmPassword"];
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMe {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub photo: Option<String>,
    pub email: Option<String>,
}

impl UpdateMe {
    pub fn into_patch(self) -> Document {
        let mut patch = Document::new();
        if let Some(first_name) = self.first_name {
            patch.insert("firstName", first_name);
        }
        if let Some(last_name) = self.last_name {
            patch.insert("lastName", last_name);
        }
        if let Some(photo) = self.photo {
            patch.insert("photo", photo);
        }
        if let Some(email) = self.email {
            patch.insert("email", email);
        }
        patch
    }
}

pub async fn hash_password(password: String, cost: u32) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(Into::into)
}

pub async fn verify_password(candidate: String, hash: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(candidate, &hash))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(Into::into)
}

pub fn hash_reset_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// A fresh reset token: the plaintext for the email, its hash for storage.
#[derive(Debug, Clone)]
pub struct ResetToken {
    pub plain: String,
    pub hashed: String,
    pub expires: DateTime,
}

impl ResetToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let plain = hex::encode(bytes);
        let expires = Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES);

        Self {
            hashed: hash_reset_token(&plain),
            plain,
            expires: DateTime::from_millis(expires.timestamp_millis()),
        }
    }
}

impl User {
    /// Validated, hashed user ready for insertion.
    pub async fn register(input: SignUp, cost: u32) -> Result<Self, AppError> {
        input.validate()?;

        let now = DateTime::now();
        Ok(Self {
            id: None,
            first_name: input.first_name,
            last_name: input.last_name,
            email: input.email.trim().to_lowercase(),
            photo: input.photo,
            password: Some(hash_password(input.password, cost).await?),
            role: Some(Role::User),
            active: Some(true),
            password_change_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            created_at: Some(now),
            updated_at: Some(now),
        })
    }

    pub fn role(&self) -> Role {
        self.role.unwrap_or_default()
    }

    pub async fn correct_password(&self, candidate: &str) -> Result<bool, AppError> {
        match &self.password {
            Some(hash) => verify_password(candidate.to_string(), hash.clone()).await,
            None => Ok(false),
        }
    }

    /// True when the password changed after a token issued at `issued_at` (unix seconds).
    pub fn password_changed_after(&self, issued_at: i64) -> bool {
        match self.password_change_at {
            Some(changed) => {
                let millis = changed.timestamp_millis();
                let changed_secs = millis.div_euclid(1000) + i64::from(millis.rem_euclid(1000) > 0);
                changed_secs > issued_at
            }
            None => false,
        }
    }
}

/// `$set` document storing a new password hash and bumping `passwordChangeAt`.
pub async fn password_update(input: NewPassword, cost: u32) -> Result<Document, AppError> {
    input.validate()?;
    let hash = hash_password(input.password, cost).await?;
    let changed = DateTime::from_millis(DateTime::now().timestamp_millis() - PASSWORD_CHANGE_SKEW_MS);

    Ok(doc! {
        "password": hash,
        "passwordChangeAt": changed,
        "updatedAt": DateTime::now(),
    })
}

#[async_trait]
impl Model for User {
    const COLLECTION: &'static str = "users";

    fn default_filter() -> Document {
        doc! {"active": {"$ne": false}}
    }

    fn hidden_fields() -> &'static [&'static str] {
        &[
            "password",
            "role",
            "active",
            "passwordResetToken",
            "passwordResetExpires",
        ]
    }

    fn sanitize_patch(mut patch: Document) -> Document {
        for field in [
            "password",
            "confirmPassword",
            "passwordChangeAt",
            "passwordResetToken",
            "passwordResetExpires",
        ] {
            patch.remove(field);
        }
        let email = patch.get_str("email").map(|e| e.trim().to_lowercase()).ok();
        if let Some(email) = email {
            patch.insert("email", email);
        }
        patch
    }

    fn add_virtuals(doc: &mut Document) {
        let full_name = match (doc.get_str("firstName"), doc.get_str("lastName")) {
            (Ok(first), Ok(last)) => format!("{} {}", first, last),
            _ => return,
        };
        doc.insert("fullName", full_name);
    }
}

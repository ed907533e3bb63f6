use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::users::repo::User;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

// Weak on purpose: existing clients were onboarded with 4-character passwords.
pub(crate) const MIN_PASSWORD_LEN: usize = 4;

/// A file received through the multipart layer, still in memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub body: Bytes,
    pub content_type: String,
}

/// Raw registration form as collected from multipart fields.
#[derive(Debug, Default)]
pub struct RegisterForm {
    pub username: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub password: Option<String>,
    pub avatar: Option<UploadedFile>,
    pub cover_image: Option<UploadedFile>,
}

/// Text fields of a registration request after validation.
/// Username is case-normalized here, before any side effect.
#[derive(Debug, Clone)]
pub struct ValidatedRegister {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
}

impl RegisterForm {
    pub fn validate(&self) -> ApiResult<ValidatedRegister> {
        let full_name = non_empty(self.full_name.as_deref(), "Full name is required")?;
        let username = non_empty(self.username.as_deref(), "Username is required")?;
        let email = non_empty(self.email.as_deref(), "Email is required")?;
        if !is_valid_email(&email) {
            return Err(ApiError::BadRequest("Invalid email format".into()));
        }
        let password = non_empty(self.password.as_deref(), "Password is required")?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::BadRequest(format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(ValidatedRegister {
            username: username.to_lowercase(),
            email,
            full_name,
            password,
        })
    }
}

fn non_empty(value: Option<&str>, message: &str) -> ApiResult<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ApiError::BadRequest(message.into())),
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

impl LoginRequest {
    /// At least one identifier must be present.
    pub fn validate(&self) -> ApiResult<()> {
        let has_username = self.username.as_deref().is_some_and(|u| !u.trim().is_empty());
        let has_email = self.email.as_deref().is_some_and(|e| !e.trim().is_empty());
        if !has_username && !has_email {
            return Err(ApiError::BadRequest("Username or email is required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

impl ChangePasswordRequest {
    pub fn validate(&self) -> ApiResult<()> {
        if self.new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::BadRequest(format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
}

impl UpdateAccountRequest {
    pub fn validate(&self) -> ApiResult<()> {
        if self.full_name.is_none() && self.email.is_none() {
            return Err(ApiError::BadRequest(
                "At least one of fullName or email is required".into(),
            ));
        }
        if let Some(email) = self.email.as_deref() {
            if !is_valid_email(email) {
                return Err(ApiError::BadRequest("Invalid email format".into()));
            }
        }
        Ok(())
    }
}

/// Public projection of a user: no password hash, no refresh token.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            avatar: user.avatar,
            cover_image: user.cover_image,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Login/refresh response body: the public user plus both tokens, for clients
/// that cannot read the HTTP-only cookies.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

/// Channel page projection with the derived subscription fields.
#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProfile {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    pub subscribers_count: i64,
    pub channels_subscribed_to_count: i64,
    pub is_subscribed: bool,
}

/// Minimal owner projection embedded in watch-history entries.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOwner {
    pub full_name: String,
    pub username: String,
    pub avatar: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchHistoryVideo {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub video_file: String,
    pub thumbnail: String,
    pub duration: f64,
    pub views: i64,
    pub created_at: OffsetDateTime,
    pub owner: VideoOwner,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn form(username: &str, email: &str, full_name: &str, password: &str) -> RegisterForm {
        RegisterForm {
            username: Some(username.into()),
            email: Some(email.into()),
            full_name: Some(full_name.into()),
            password: Some(password.into()),
            avatar: None,
            cover_image: None,
        }
    }

    #[test]
    fn valid_registration_passes_and_lowercases_username() {
        let input = form("Alice", "a@x.com", "Alice A", "1234")
            .validate()
            .expect("valid form");
        assert_eq!(input.username, "alice");
        assert_eq!(input.email, "a@x.com");
    }

    #[test]
    fn registration_rejects_missing_fields() {
        let err = RegisterForm::default().validate().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = form("alice", "a@x.com", "   ", "1234").validate().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn registration_rejects_bad_email_and_short_password() {
        let err = form("alice", "not-an-email", "Alice", "1234")
            .validate()
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = form("alice", "a@x.com", "Alice", "123").validate().unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn login_requires_at_least_one_identifier() {
        let req = LoginRequest {
            username: None,
            email: None,
            password: "x".into(),
        };
        assert_eq!(req.validate().unwrap_err().status(), StatusCode::BAD_REQUEST);

        let req = LoginRequest {
            username: Some("alice".into()),
            email: None,
            password: "x".into(),
        };
        assert!(req.validate().is_ok());

        let req = LoginRequest {
            username: None,
            email: Some("a@x.com".into()),
            password: "x".into(),
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn update_account_requires_some_field() {
        let req = UpdateAccountRequest {
            full_name: None,
            email: None,
        };
        assert_eq!(req.validate().unwrap_err().status(), StatusCode::BAD_REQUEST);

        let req = UpdateAccountRequest {
            full_name: Some("New Name".into()),
            email: None,
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn public_user_serialization_has_no_secret_fields() {
        let user = PublicUser {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "a@x.com".into(),
            full_name: "Alice".into(),
            avatar: "https://media.local/a.png".into(),
            cover_image: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("refreshToken").is_none());
        assert_eq!(json["fullName"], "Alice");
    }

    #[test]
    fn channel_profile_uses_canonical_field_names() {
        let profile = ChannelProfile {
            id: Uuid::new_v4(),
            username: "chan".into(),
            full_name: "Channel".into(),
            email: "c@x.com".into(),
            avatar: "a".into(),
            cover_image: None,
            subscribers_count: 2,
            channels_subscribed_to_count: 1,
            is_subscribed: true,
        };
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["subscribersCount"], 2);
        assert_eq!(json["channelsSubscribedToCount"], 1);
        assert_eq!(json["isSubscribed"], true);
        assert_eq!(json["fullName"], "Channel");
    }
}

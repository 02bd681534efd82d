// src/models/user.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'users' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,

    /// Unique, lower-cased username.
    pub username: String,

    /// Unique, lower-cased email address.
    pub email: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    pub full_name: Option<String>,

    /// User role: 'teacher' or 'admin'.
    pub role: String,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for creating a new teacher account (Registration).
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(
        length(min = 3, max = 50, message = "Username must be 3-50 characters"),
        custom(function = validate_alphanumeric)
    )]
    pub username: String,

    #[validate(
        email(message = "Must be a valid email address"),
        length(max = 100)
    )]
    pub email: String,

    #[validate(length(
        min = 8,
        max = 128,
        message = "Password must be at least 8 characters"
    ))]
    pub password: String,

    #[validate(length(max = 100))]
    pub full_name: Option<String>,
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 50))]
    pub username: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

fn validate_alphanumeric(username: &str) -> Result<(), validator::ValidationError> {
    if !username.trim().chars().all(|c| c.is_ascii_alphanumeric()) {
        let mut err = validator::ValidationError::new("username_not_alphanumeric");
        err.message = Some("Username must be alphanumeric".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, email: &str, password: &str) -> CreateUserRequest {
        CreateUserRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            full_name: None,
        }
    }

    #[test]
    fn accepts_valid_registration() {
        assert!(request("teacher01", "t@school.edu", "longenough").validate().is_ok());
    }

    #[test]
    fn rejects_non_alphanumeric_username() {
        assert!(request("bad name!", "t@school.edu", "longenough").validate().is_err());
    }

    #[test]
    fn rejects_bad_email_and_short_password() {
        assert!(request("teacher01", "not-an-email", "longenough").validate().is_err());
        assert!(request("teacher01", "t@school.edu", "short").validate().is_err());
    }
}

//! Account fields: validation, roles and password hashing.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{AqiError, Result};

static GMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@gmail\.com$").expect("valid email pattern"));
static SPECIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[!@#$%^&*(),.?":{}|<>]"#).expect("valid special-char pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Admin => "Admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AqiError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "User" => Ok(Role::User),
            "Admin" => Ok(Role::Admin),
            other => Err(AqiError::InvalidInput(format!("unknown role: {}", other))),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: AqiError| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub mobile: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A validated, hashed account ready to insert.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub mobile: String,
    pub password_hash: String,
    pub role: Role,
}

/// Raw registration form.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub mobile: String,
    pub password: String,
    pub confirm_password: Option<String>,
}

impl Registration {
    /// Validate every field and hash the password.
    pub fn into_new_user(self, role: Role) -> Result<NewUser> {
        let name = validate_name(&self.name)?;
        let email = validate_gmail(&self.email)?;
        let mobile = validate_mobile(&self.mobile)?;
        validate_password(&self.password, self.confirm_password.as_deref())?;
        Ok(NewUser {
            name,
            email,
            mobile,
            password_hash: hash_password(&self.password)?,
            role,
        })
    }
}

fn invalid(msg: &str) -> AqiError {
    AqiError::Validation(msg.to_string())
}

pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid("Name is required"));
    }
    let len = name.chars().count();
    if len < 2 {
        return Err(invalid("Name must be at least 2 characters"));
    }
    if len > 100 {
        return Err(invalid("Name must not exceed 100 characters"));
    }
    Ok(name.to_string())
}

/// Returns the trimmed, lowercased address.
pub fn validate_gmail(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(invalid("Email is required"));
    }
    if !GMAIL.is_match(&email) {
        return Err(invalid("Email must be in format: username@gmail.com"));
    }
    Ok(email)
}

pub fn validate_mobile(mobile: &str) -> Result<String> {
    let mobile = mobile.trim();
    if mobile.is_empty() {
        return Err(invalid("Mobile number is required"));
    }
    if !mobile.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("Mobile number must contain only digits"));
    }
    if mobile.len() != 10 {
        return Err(invalid("Mobile number must be exactly 10 digits"));
    }
    Ok(mobile.to_string())
}

pub fn validate_password(password: &str, confirm: Option<&str>) -> Result<()> {
    if password.is_empty() {
        return Err(invalid("Password is required"));
    }
    if password.chars().count() < 8 {
        return Err(invalid("Password must be at least 8 characters"));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(invalid("Password must contain at least one uppercase letter"));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Err(invalid("Password must contain at least one lowercase letter"));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(invalid("Password must contain at least one digit"));
    }
    if !SPECIAL.is_match(password) {
        return Err(invalid(
            "Password must contain at least one special character (!@#$%^&*(),.?\":{}|<>)",
        ));
    }
    if confirm.is_some_and(|c| c != password) {
        return Err(invalid("Passwords do not match"));
    }
    Ok(())
}

/// Argon2id PHC string with a random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AqiError::InvalidInput(format!("password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::Deserialize;
use sqlx::{FromRow, SqlitePool};

use crate::{
    error::AppError,
    utils::{hash_password, verify_password},
};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"));

/// Privilege given to self-registered accounts.
pub const MEMBER_PRIVILEGE_ID: i64 = 2;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub registered_at: NaiveDateTime,
    pub privilege_id: i64,
    pub privilege: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub redirect: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterForm {
    #[serde(default, rename = "prenom")]
    pub first_name: String,
    #[serde(default, rename = "nom_utilisateur")]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, rename = "mot_de_passe")]
    pub password: String,
    #[serde(default, rename = "confirmer-mot-de-passe")]
    pub password_confirmation: String,
}

impl RegisterForm {
    /// Field checks that need no database access. Every violation is reported.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.first_name.trim().is_empty() {
            errors.push("Le prénom est requis".to_string());
        }
        if self.username.trim().is_empty() {
            errors.push("Le nom d'utilisateur est requis".to_string());
        }
        if !EMAIL_RE.is_match(self.email.trim()) {
            errors.push("Un email valide est requis".to_string());
        }
        if self.password.is_empty() {
            errors.push("Le mot de passe est requis".to_string());
        } else if self.password.chars().count() < 8 {
            errors.push("Le mot de passe doit contenir au moins 8 caractères".to_string());
        }
        if self.password != self.password_confirmation {
            errors.push("Les mots de passe ne correspondent pas".to_string());
        }

        errors
    }

    /// Uniqueness checks against existing accounts.
    pub async fn check_availability(&self, pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
        let mut errors = Vec::new();
        let username = self.username.trim();
        let email = self.email.trim();

        if !username.is_empty() && User::username_exists(pool, username).await? {
            errors.push("Ce nom d'utilisateur est déjà utilisé".to_string());
        }
        if !email.is_empty() && User::email_exists(pool, email).await? {
            errors.push("Cet email est déjà utilisé".to_string());
        }

        Ok(errors)
    }
}

const USER_COLUMNS: &str = r#"
    u.id, u.first_name, u.username, u.email, u.password_hash, u.registered_at,
    u.privilege_id, p.role AS privilege
    FROM users u
    LEFT JOIN privileges p ON p.id = u.privilege_id
"#;

impl User {
    pub async fn create(pool: &SqlitePool, form: &RegisterForm, cost: u32) -> Result<i64, AppError> {
        let password_hash = hash_password(&form.password, cost)?;

        let result = sqlx::query(
            r#"
            INSERT INTO users (first_name, username, email, password_hash, registered_at, privilege_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(form.first_name.trim())
        .bind(form.username.trim())
        .bind(form.email.trim())
        .bind(password_hash)
        .bind(chrono::Utc::now().naive_utc())
        .bind(MEMBER_PRIVILEGE_ID)
        .execute(pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Looks the account up by login name or email and checks the password.
    pub async fn authenticate(
        pool: &SqlitePool,
        identifier: &str,
        password: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} WHERE u.username = ? OR u.email = ? LIMIT 1",
            USER_COLUMNS
        ))
        .bind(identifier)
        .bind(identifier)
        .fetch_optional(pool)
        .await?;

        match user {
            Some(user) if verify_password(password, &user.password_hash)? => Ok(Some(user)),
            _ => Ok(None),
        }
    }

    pub async fn username_exists(pool: &SqlitePool, username: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn email_exists(pool: &SqlitePool, email: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(pool)
            .await?;
        Ok(count > 0)
    }
}

pub fn is_unique_violation(err: &AppError) -> bool {
    matches!(err, AppError::Database(sqlx::Error::Database(db)) if db.is_unique_violation())
}

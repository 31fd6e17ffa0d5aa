use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("session store error: {0}")]
    SessionStore(#[from] redis::RedisError),

    #[error("session encoding error: {0}")]
    SessionEncoding(#[from] serde_json::Error),

    #[error("template error: {0}")]
    Template(#[from] askama::Error),

    #[error("password hashing error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::BadRequest(_) => "La requête est invalide.",
            _ => "Une erreur interne est survenue. Veuillez réessayer plus tard.",
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "rejected request");
        }

        let body = Html(format!(
            "<h1>{} - Erreur</h1><p>{}</p>",
            status.as_u16(),
            message
        ));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

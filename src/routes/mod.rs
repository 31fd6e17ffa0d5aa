pub mod dispatch;
pub mod home;
pub mod stamp;
pub mod user;

use axum::{
    body::Body,
    extract::FromRequest,
    http::{Request, Uri},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use serde::de::DeserializeOwned;

use crate::{
    AppState,
    error::AppError,
    session::{FlashKind, Session, SessionUser},
    views::PageContext,
};

pub use dispatch::{Params, RouteTable};

pub fn route_table() -> RouteTable {
    let mut table = RouteTable::new();
    table
        .get("/", home::index)
        .get("/register", user::register)
        .post("/register", user::store)
        .get("/login", user::login)
        .post("/login", user::authenticate)
        .any("/logout", user::logout)
        .get("/timbres", stamp::index)
        .get("/timbres/create", stamp::create)
        .any("/timbres/store", stamp::store)
        .get("/timbres/{id}", stamp::show)
        .get("/timbres/{id}/edit", stamp::edit)
        .any("/timbres/{id}/update", stamp::update)
        .any("/timbres/{id}/delete", stamp::delete)
        .any(
            "/timbres/{timbre_id}/images/{image_id}/delete",
            stamp::delete_image,
        );
    table
}

/// 303 redirect to an application path, base path prepended.
pub fn redirect_to(state: &AppState, path: &str) -> Response {
    Redirect::to(&state.config.url(path)).into_response()
}

/// Returns the logged-in user, or a redirect to the login page carrying the
/// current URI so the user comes back after authenticating.
pub async fn require_auth(
    state: &AppState,
    session: &Session,
    uri: &Uri,
) -> Result<SessionUser, Response> {
    if let Some(user) = session.user().await {
        return Ok(user);
    }

    session
        .flash(
            FlashKind::Warning,
            "Vous devez être connecté pour accéder à cette page.",
        )
        .await;

    let current = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let query = serde_urlencoded::to_string([("redirect", current)]).unwrap_or_default();
    Err(Redirect::to(&format!("{}?{}", state.config.url("/login"), query)).into_response())
}

/// Layout data for a rendered page. Consumes the pending flash messages.
pub async fn page_context(state: &AppState, session: &Session, title: &str) -> PageContext {
    let user = session.user().await;
    let flashes = session.take_flash().await;
    PageContext::new(&state.config, title, user.as_ref(), flashes)
}

pub async fn read_form<T: DeserializeOwned>(
    state: &AppState,
    req: Request<Body>,
) -> Result<T, AppError> {
    let Form(form) = Form::<T>::from_request(req, state)
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?;
    Ok(form)
}

#[cfg(test)]
pub(crate) mod tests_support {
    use std::sync::Arc;
    use std::time::Duration;

    use sqlx::SqlitePool;

    use crate::{
        AppState,
        config::Config,
        session::{MemoryStore, SessionStore},
    };

    /// State whose pool never connects; enough for code paths that do not query.
    pub async fn state() -> AppState {
        AppState {
            pool: SqlitePool::connect_lazy("sqlite::memory:").unwrap(),
            config: Arc::new(Config::default()),
            sessions: SessionStore::Memory(MemoryStore::new(Duration::from_secs(60))),
        }
    }
}

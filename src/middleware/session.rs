use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::{debug, warn};

use crate::{
    AppState,
    session::{ClientCheck, FlashKind, Session},
    utils::client_fingerprint,
};

/// Loads the session named by the request cookie (or starts a new one), exposes
/// it to handlers as a request extension, then persists it and refreshes the cookie.
pub async fn session_layer(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let cookie_name = state.config.session_cookie_name.clone();
    let presented_id = jar.get(&cookie_name).map(|c| c.value().to_string());

    let restored = match &presented_id {
        Some(id) => match state.sessions.load(id).await {
            Ok(data) => data.map(|data| Session::existing(id.clone(), data)),
            Err(e) => {
                warn!(error = %e, "Failed to load session, starting a new one");
                None
            }
        },
        None => None,
    };
    let session = restored.unwrap_or_default();

    let fingerprint = client_fingerprint(&req);
    let idle_timeout = state.config.session_idle_timeout().as_secs() as i64;
    let now = chrono::Utc::now().timestamp();
    match session.check_client(&fingerprint, idle_timeout, now).await {
        ClientCheck::Expired => {
            session
                .flash(
                    FlashKind::Warning,
                    "Votre session a expiré. Veuillez vous reconnecter.",
                )
                .await;
        }
        ClientCheck::FingerprintMismatch => {
            warn!("Session presented by a different client, identity dropped");
        }
        ClientCheck::Anonymous | ClientCheck::Active => {}
    }

    req.extensions_mut().insert(session.clone());
    let response = next.run(req).await;

    let snapshot = session.snapshot().await;

    if let Some(previous) = snapshot.previous_id.as_deref() {
        if previous != snapshot.id || snapshot.data.is_empty() {
            if let Err(e) = state.sessions.remove(previous).await {
                warn!(error = %e, "Failed to remove stale session");
            }
        }
    }

    if snapshot.data.is_empty() {
        if presented_id.is_some() {
            let removal = Cookie::build((cookie_name, ""))
                .path(state.config.cookie_path())
                .build();
            return (jar.remove(removal), response).into_response();
        }
        return response;
    }

    if let Err(e) = state.sessions.save(&snapshot.id, &snapshot.data).await {
        warn!(error = %e, "Failed to persist session");
        return response;
    }

    if presented_id.as_deref() == Some(snapshot.id.as_str()) {
        return response;
    }

    debug!("Issuing session cookie");
    let cookie = Cookie::build((cookie_name, snapshot.id))
        .path(state.config.cookie_path())
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    (jar.add(cookie), response).into_response()
}

/// Session attached by [`session_layer`]; a detached empty one when the layer is absent.
pub fn request_session<B>(req: &Request<B>) -> Session {
    req.extensions().get::<Session>().cloned().unwrap_or_default()
}

use axum::{
    body::Body,
    extract::Query,
    http::{Method, Request, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::{
    AppState,
    error::AppResult,
    middleware::request_session,
    routes::{Params, page_context, read_form, redirect_to},
    session::{FlashKind, SessionUser},
    utils::{client_fingerprint, local_redirect_target},
    views::{LoginTemplate, RegisterFormView, RegisterTemplate, render, render_with_status},
};

use super::model::{LoginForm, RegisterForm, User, is_unique_violation};

#[derive(Debug, Default, Deserialize)]
struct LoginQuery {
    redirect: Option<String>,
}

pub async fn login(state: AppState, req: Request<Body>, _: Params) -> AppResult<Response> {
    let session = request_session(&req);
    let query = Query::<LoginQuery>::try_from_uri(req.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();

    let template = LoginTemplate {
        page: page_context(&state, &session, "Connexion").await,
        redirect: local_redirect_target(query.redirect.as_deref()).unwrap_or_default(),
    };
    render(&template)
}

fn login_page(state: &AppState, redirect: Option<&str>) -> Response {
    match local_redirect_target(redirect) {
        Some(target) => {
            let query = serde_urlencoded::to_string([("redirect", target)]).unwrap_or_default();
            Redirect::to(&format!("{}?{}", state.config.url("/login"), query)).into_response()
        }
        None => redirect_to(state, "/login"),
    }
}

pub async fn authenticate(state: AppState, req: Request<Body>, _: Params) -> AppResult<Response> {
    let session = request_session(&req);
    let fingerprint = client_fingerprint(&req);
    let form: LoginForm = read_form(&state, req).await?;
    let identifier = form.username.trim();

    if identifier.is_empty() || form.password.is_empty() {
        session
            .flash(FlashKind::Error, "Veuillez remplir tous les champs")
            .await;
        return Ok(login_page(&state, form.redirect.as_deref()));
    }

    let user = match User::authenticate(&state.pool, identifier, &form.password).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(identifier, "Failed login attempt");
            session
                .flash(
                    FlashKind::Error,
                    "Nom d'utilisateur ou mot de passe incorrect",
                )
                .await;
            return Ok(login_page(&state, form.redirect.as_deref()));
        }
        Err(e) => {
            error!(error = %e, "Login failed");
            session
                .flash(
                    FlashKind::Error,
                    "Une erreur est survenue lors de la connexion. Veuillez réessayer.",
                )
                .await;
            return Ok(login_page(&state, form.redirect.as_deref()));
        }
    };

    session
        .log_in(SessionUser {
            user_id: user.id,
            display_name: user.first_name.clone(),
            username: user.username.clone(),
            privilege_id: user.privilege_id,
            privilege: user.privilege.clone(),
            fingerprint,
            last_activity: chrono::Utc::now().timestamp(),
        })
        .await;
    info!(user_id = user.id, "User logged in");

    session
        .flash(
            FlashKind::Success,
            format!("Connexion réussie! Bienvenue {}", user.first_name),
        )
        .await;

    Ok(match local_redirect_target(form.redirect.as_deref()) {
        Some(target) => Redirect::to(&target).into_response(),
        None => redirect_to(&state, "/"),
    })
}

pub async fn register(state: AppState, req: Request<Body>, _: Params) -> AppResult<Response> {
    let session = request_session(&req);
    let template = RegisterTemplate {
        page: page_context(&state, &session, "Inscription").await,
        errors: Vec::new(),
        form: RegisterFormView::default(),
    };
    render(&template)
}

pub async fn store(state: AppState, req: Request<Body>, _: Params) -> AppResult<Response> {
    let session = request_session(&req);
    let form: RegisterForm = read_form(&state, req).await?;

    let mut errors = form.validate();
    let created = match form.check_availability(&state.pool).await {
        Ok(taken) => {
            errors.extend(taken);
            if errors.is_empty() {
                info!(username = %form.username.trim(), "Registering user");
                Some(User::create(&state.pool, &form, state.config.bcrypt_cost).await)
            } else {
                None
            }
        }
        Err(e) => Some(Err(e.into())),
    };

    match created {
        Some(Ok(user_id)) => {
            info!(user_id, "User registered");
            session
                .flash(
                    FlashKind::Success,
                    "Inscription réussie! Vous pouvez maintenant vous connecter.",
                )
                .await;
            return Ok(redirect_to(&state, "/login"));
        }
        Some(Err(e)) if is_unique_violation(&e) => {
            errors.push("Ce nom d'utilisateur ou cet email est déjà utilisé".to_string());
        }
        Some(Err(e)) => {
            error!(error = %e, "Registration failed");
            session
                .flash(
                    FlashKind::Error,
                    "Erreur lors de l'inscription. Veuillez réessayer plus tard ou contacter l'administrateur.",
                )
                .await;
            return Ok(redirect_to(&state, "/register"));
        }
        None => {}
    }

    let template = RegisterTemplate {
        page: page_context(&state, &session, "Inscription").await,
        errors,
        form: RegisterFormView {
            first_name: form.first_name,
            username: form.username,
            email: form.email,
        },
    };
    render_with_status(StatusCode::UNPROCESSABLE_ENTITY, &template)
}

pub async fn logout(state: AppState, req: Request<Body>, _: Params) -> AppResult<Response> {
    if req.method() != Method::POST {
        return Ok(redirect_to(&state, "/"));
    }

    let session = request_session(&req);
    if let Some(user_id) = session.user_id().await {
        info!(user_id, "User logged out");
    }
    session.log_out().await;
    session
        .flash(FlashKind::Info, "Vous avez été déconnecté.")
        .await;
    Ok(redirect_to(&state, "/login"))
}

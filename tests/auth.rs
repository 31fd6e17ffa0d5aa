mod common;

use axum::http::StatusCode;
use common::{PASSWORD, TestApp, body_text, location};
use stampee::routes::user::model::User;

#[tokio::test]
async fn registration_creates_an_account_and_redirects_to_login() {
    let app = TestApp::new().await;
    let mut client = app.client();

    let response = client.register("alice", "alice@example.com").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
    assert_eq!(app.count("users").await, 1);
    assert!(
        client
            .flash_texts()
            .await
            .iter()
            .any(|m| m.starts_with("Inscription réussie"))
    );

    let stored = User::authenticate(&app.state.pool, "alice", PASSWORD)
        .await
        .unwrap()
        .expect("account exists");
    assert_eq!(stored.first_name, "Testeur");
    assert_eq!(stored.privilege.as_deref(), Some("membre"));
    assert_ne!(stored.password_hash, PASSWORD);
}

#[tokio::test]
async fn invalid_registrations_create_no_row() {
    let app = TestApp::new().await;
    let mut client = app.client();
    client.register("alice", "alice@example.com").await;

    let cases: [(&str, &str, &str, &str, &str); 4] = [
        ("bob", "bob@example.com", "motdepasse", "autrechose", "ne correspondent pas"),
        ("bob", "bob@example.com", "court", "court", "au moins 8"),
        ("bob", "pas-un-email", "motdepasse", "motdepasse", "email valide"),
        ("alice", "autre@example.com", "motdepasse", "motdepasse", "déjà utilisé"),
    ];

    for (username, email, password, confirmation, expected) in cases {
        let response = client
            .post_form(
                "/register",
                &[
                    ("prenom", "Bob"),
                    ("nom_utilisateur", username),
                    ("email", email),
                    ("mot_de_passe", password),
                    ("confirmer-mot-de-passe", confirmation),
                ],
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let html = body_text(response).await;
        assert!(html.contains(expected), "missing `{expected}` for {username}/{email}");
    }

    assert_eq!(app.count("users").await, 1);
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
    let app = TestApp::new().await;
    let mut client = app.client();
    client.register("alice", "alice@example.com").await;

    let response = client.register("alice2", "alice@example.com").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(response).await.contains("Cet email est"));
    assert_eq!(app.count("users").await, 1);
}

#[tokio::test]
async fn login_regenerates_the_session_cookie() {
    let app = TestApp::new().await;
    let mut client = app.client();
    client.register("alice", "alice@example.com").await;
    let anonymous_id = client.session_id.clone().expect("flash keeps a session");

    let response = client.login("alice", PASSWORD).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");

    let logged_in_id = client.session_id.clone().unwrap();
    assert_ne!(anonymous_id, logged_in_id);

    let session = client.session().await;
    let user = session.user.expect("user stored in session");
    assert_eq!(user.username, "alice");
    assert_eq!(user.display_name, "Testeur");
    assert_eq!(user.privilege_id, 2);
    assert!(!user.fingerprint.is_empty());

    // The pre-login session no longer exists server-side.
    assert!(app.state.sessions.load(&anonymous_id).await.unwrap().is_none());
}

#[tokio::test]
async fn email_works_as_login_identifier() {
    let app = TestApp::new().await;
    let mut client = app.client();
    client.register("alice", "alice@example.com").await;

    client.login("alice@example.com", PASSWORD).await;
    assert!(client.session().await.user.is_some());
}

#[tokio::test]
async fn wrong_password_leaves_the_session_anonymous() {
    let app = TestApp::new().await;
    let mut client = app.client();
    client.register("alice", "alice@example.com").await;

    let response = client.login("alice", "mauvaismotdepasse").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");

    let session = client.session().await;
    assert!(session.user.is_none());
    assert!(
        session
            .flash_messages
            .iter()
            .any(|f| f.message == "Nom d'utilisateur ou mot de passe incorrect")
    );
}

#[tokio::test]
async fn empty_credentials_are_refused() {
    let app = TestApp::new().await;
    let mut client = app.client();

    let response = client.login("", "").await;
    assert_eq!(location(&response), "/login");
    assert_eq!(
        client.flash_texts().await,
        vec!["Veuillez remplir tous les champs".to_string()]
    );
}

#[tokio::test]
async fn protected_pages_redirect_to_login_with_return_path() {
    let app = TestApp::new().await;
    let mut client = app.client();

    let response = client.get("/timbres?page=2").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login?redirect=%2Ftimbres%3Fpage%3D2");
    assert_eq!(
        client.flash_texts().await,
        vec!["Vous devez être connecté pour accéder à cette page.".to_string()]
    );

    let page = client.get("/login?redirect=%2Ftimbres%3Fpage%3D2").await;
    assert_eq!(page.status(), StatusCode::OK);
    let html = body_text(page).await;
    assert!(html.contains("name=\"redirect\""));
    assert!(html.contains("être connecté"));
}

#[tokio::test]
async fn login_honours_only_local_redirects() {
    let app = TestApp::new().await;
    let mut client = app.client();
    client.register("alice", "alice@example.com").await;

    let response = client
        .post_form(
            "/login",
            &[
                ("username", "alice"),
                ("password", PASSWORD),
                ("redirect", "/timbres?page=2"),
            ],
        )
        .await;
    assert_eq!(location(&response), "/timbres?page=2");

    let mut other = app.client();
    let response = other
        .post_form(
            "/login",
            &[
                ("username", "alice"),
                ("password", PASSWORD),
                ("redirect", "//evil.example.com/"),
            ],
        )
        .await;
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn logout_requires_post() {
    let app = TestApp::new().await;
    let (mut client, _) = app.member("alice").await;

    let response = client.get("/logout").await;
    assert_eq!(location(&response), "/");
    assert!(client.session().await.user.is_some());

    let response = client.post_form("/logout", &[]).await;
    assert_eq!(location(&response), "/login");
    assert!(client.session().await.user.is_none());
}

#[tokio::test]
async fn session_cookie_from_another_client_is_dropped() {
    let app = TestApp::new().await;
    let (client, _) = app.member("alice").await;
    let session_id = client.session_id.clone().unwrap();

    let mut thief = app.client();
    thief.session_id = Some(session_id);
    let req = axum::http::Request::get("/timbres")
        .header("user-agent", "curl/8.0")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = thief.send(req).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("/login"));
}

#[tokio::test]
async fn idle_sessions_expire() {
    let app = TestApp::with_config(|c| c.session_idle_timeout_secs = 0).await;
    let (mut client, _) = app.member("alice").await;

    // The idle check is strict, so wait past the one-second timestamp granularity.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let response = client.get("/timbres").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(
        client
            .flash_texts()
            .await
            .iter()
            .any(|m| m.contains("session a expiré"))
    );
}

#[tokio::test]
async fn unknown_paths_get_the_404_page() {
    let app = TestApp::new().await;
    let mut client = app.client();

    for path in ["/nope", "/timbres/1/extra", "/timbres/"] {
        let response = client.get(path).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
        assert!(body_text(response).await.contains("404 - Page non trouvée"));
    }
}

#[tokio::test]
async fn routes_live_under_the_base_path() {
    let app = TestApp::with_config(|c| c.base_path = "/Stampee".into()).await;
    let mut client = app.client();

    assert_eq!(client.get("/Stampee/login").await.status(), StatusCode::OK);
    assert_eq!(client.get("/Stampee").await.status(), StatusCode::OK);
    assert_eq!(
        client.get("/index.php?url=register").await.status(),
        StatusCode::OK
    );

    let response = client.get("/Stampee/timbres").await;
    assert_eq!(
        location(&response),
        "/Stampee/login?redirect=%2FStampee%2Ftimbres"
    );
}

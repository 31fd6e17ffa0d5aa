#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use stampee::{
    AppState, build_app,
    config::Config,
    database,
    session::{MemoryStore, SessionData, SessionStore},
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const PASSWORD: &str = "motdepasse";
const BOUNDARY: &str = "stampee-test-boundary";

pub struct TestApp {
    pub state: AppState,
    router: Router,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("stampee.db");

        let mut config = Config {
            database_url: format!("sqlite://{}", db_path.display()),
            public_dir: dir.path().join("public"),
            bcrypt_cost: 4,
            ..Config::default()
        };
        customize(&mut config);

        let pool = database::connect(&config.database_url).await.unwrap();
        database::migrate(&pool).await.unwrap();

        let state = AppState {
            pool,
            sessions: SessionStore::Memory(MemoryStore::new(Duration::from_secs(3600))),
            config: Arc::new(config),
        };
        let router = build_app(state.clone());

        Self {
            state,
            router,
            _dir: dir,
        }
    }

    /// A browser with its own cookie jar.
    pub fn client(&self) -> Client {
        Client {
            router: self.router.clone(),
            sessions: self.state.sessions.clone(),
            cookie_name: self.state.config.session_cookie_name.clone(),
            session_id: None,
        }
    }

    /// Registers an account and returns a client logged in as it, plus the user id.
    pub async fn member(&self, username: &str) -> (Client, i64) {
        let mut client = self.client();
        let response = client.register(username, &format!("{username}@example.com")).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let response = client.login(username, PASSWORD).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let user_id = client.session().await.user.expect("logged in").user_id;
        (client, user_id)
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.state.pool)
            .await
            .unwrap()
    }
}

pub struct Client {
    router: Router,
    sessions: SessionStore,
    cookie_name: String,
    pub session_id: Option<String>,
}

impl Client {
    pub async fn send(&mut self, mut req: Request<Body>) -> Response {
        if let Some(id) = &self.session_id {
            req.headers_mut().insert(
                header::COOKIE,
                format!("{}={}", self.cookie_name, id).parse().unwrap(),
            );
        }

        let response = self.router.clone().oneshot(req).await.unwrap();

        for value in response.headers().get_all(header::SET_COOKIE) {
            let value = value.to_str().unwrap();
            let pair = value.split(';').next().unwrap();
            if let Some((name, id)) = pair.split_once('=') {
                if name == self.cookie_name {
                    self.session_id = (!id.is_empty()).then(|| id.to_string());
                }
            }
        }
        response
    }

    pub async fn get(&mut self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_form(&mut self, uri: &str, fields: &[(&str, &str)]) -> Response {
        let body = serde_urlencoded::to_string(fields).unwrap();
        let req = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        self.send(req).await
    }

    pub async fn post_multipart(
        &mut self,
        uri: &str,
        fields: &[(&str, &str)],
        files: &[Upload],
    ) -> Response {
        let req = Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(fields, files)))
            .unwrap();
        self.send(req).await
    }

    pub async fn register(&mut self, username: &str, email: &str) -> Response {
        self.post_form(
            "/register",
            &[
                ("prenom", "Testeur"),
                ("nom_utilisateur", username),
                ("email", email),
                ("mot_de_passe", PASSWORD),
                ("confirmer-mot-de-passe", PASSWORD),
            ],
        )
        .await
    }

    pub async fn login(&mut self, identifier: &str, password: &str) -> Response {
        self.post_form("/login", &[("username", identifier), ("password", password)])
            .await
    }

    /// Server-side state of this client's session.
    pub async fn session(&self) -> SessionData {
        match &self.session_id {
            Some(id) => self.sessions.load(id).await.unwrap().unwrap_or_default(),
            None => SessionData::default(),
        }
    }

    pub async fn flash_texts(&self) -> Vec<String> {
        self.session()
            .await
            .flash_messages
            .into_iter()
            .map(|f| f.message)
            .collect()
    }
}

pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn png(name: &str, img: RgbaImage) -> Self {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        Self {
            file_name: name.to_string(),
            content_type: "image/png".to_string(),
            bytes: buf.into_inner(),
        }
    }

    pub fn opaque_png(name: &str) -> Self {
        Self::png(name, RgbaImage::from_pixel(40, 30, Rgba([200, 40, 40, 255])))
    }

    pub fn transparent_png(name: &str) -> Self {
        let mut img = RgbaImage::from_pixel(40, 30, Rgba([10, 120, 200, 255]));
        img.put_pixel(3, 3, Rgba([10, 120, 200, 0]));
        Self::png(name, img)
    }
}

fn multipart_body(fields: &[(&str, &str)], files: &[Upload]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for file in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"images\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                file.file_name, file.content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(&file.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .expect("redirect has a location")
        .to_str()
        .unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

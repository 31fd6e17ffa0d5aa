//! Method + path-pattern route table.
//!
//! Patterns are literal paths optionally containing `{name}` placeholders, each
//! matching exactly one path segment. Resolution tries an exact pattern match
//! first, then scans the method's patterns in registration order; the first
//! match wins. Captured segments are handed to the handler positionally.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock};

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use regex::Regex;

use crate::AppState;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{[a-zA-Z0-9_]+\}").expect("placeholder pattern is valid")
});

/// Path segments captured by a pattern's placeholders, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<String>);

impl Params {
    pub fn new(values: Vec<String>) -> Self {
        Self(values)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn parse<T: std::str::FromStr>(&self, index: usize) -> Option<T> {
        self.get(index).and_then(|v| v.parse().ok())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub type BoxedHandler =
    Arc<dyn Fn(AppState, Request<Body>, Params) -> BoxFuture<'static, Response> + Send + Sync>;

struct Route {
    pattern: String,
    regex: Regex,
    handler: BoxedHandler,
}

#[derive(Default)]
pub struct RouteTable {
    routes: HashMap<Method, Vec<Route>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<H, Fut, R>(&mut self, pattern: &str, handler: H) -> &mut Self
    where
        H: Fn(AppState, Request<Body>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        self.add(Method::GET, pattern, boxed(handler))
    }

    pub fn post<H, Fut, R>(&mut self, pattern: &str, handler: H) -> &mut Self
    where
        H: Fn(AppState, Request<Body>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        self.add(Method::POST, pattern, boxed(handler))
    }

    /// Registers the handler for both GET and POST.
    pub fn any<H, Fut, R>(&mut self, pattern: &str, handler: H) -> &mut Self
    where
        H: Fn(AppState, Request<Body>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        let handler = boxed(handler);
        self.add(Method::GET, pattern, handler.clone());
        self.add(Method::POST, pattern, handler)
    }

    fn add(&mut self, method: Method, pattern: &str, handler: BoxedHandler) -> &mut Self {
        let pattern = with_leading_slash(pattern);
        let routes = self.routes.entry(method).or_default();

        // Re-registering a pattern replaces its handler but keeps its position.
        if let Some(existing) = routes.iter_mut().find(|r| r.pattern == pattern) {
            existing.handler = handler;
            return self;
        }

        let regex = pattern_to_regex(&pattern);
        routes.push(Route {
            pattern,
            regex,
            handler,
        });
        self
    }

    pub fn resolve(&self, method: &Method, path: &str) -> Option<(BoxedHandler, Params)> {
        let routes = self.routes.get(method)?;

        if let Some(route) = routes.iter().find(|r| r.pattern == path) {
            return Some((route.handler.clone(), Params::default()));
        }

        routes.iter().find_map(|route| {
            route.regex.captures(path).map(|caps| {
                let values = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .map(|m| m.as_str().to_string())
                    .collect();
                (route.handler.clone(), Params::new(values))
            })
        })
    }

    pub async fn dispatch(&self, state: AppState, req: Request<Body>) -> Response {
        let path = effective_path(req.uri(), &state.config.base_path);
        let method = req.method().clone();

        match self.resolve(&method, &path) {
            Some((handler, params)) => {
                tracing::debug!(%method, %path, params = params.len(), "route matched");
                handler(state, req, params).await
            }
            None => {
                tracing::debug!(%method, %path, "no route matched");
                not_found(&state.config.base_path)
            }
        }
    }
}

fn boxed<H, Fut, R>(handler: H) -> BoxedHandler
where
    H: Fn(AppState, Request<Body>, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    Arc::new(move |state, req, params| {
        let fut = handler(state, req, params);
        Box::pin(async move { fut.await.into_response() })
    })
}

fn with_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// `/timbres/{id}` becomes `^/timbres/([^/]+)$`.
fn pattern_to_regex(pattern: &str) -> Regex {
    let mut regex = String::from("^");
    let mut last = 0;
    for placeholder in PLACEHOLDER.find_iter(pattern) {
        regex.push_str(&regex::escape(&pattern[last..placeholder.start()]));
        regex.push_str("([^/]+)");
        last = placeholder.end();
    }
    regex.push_str(&regex::escape(&pattern[last..]));
    regex.push('$');
    Regex::new(&regex).expect("escaped route pattern is a valid regex")
}

/// Path used for routing: the `url` query parameter when present, else the request
/// path, with the application base path stripped.
pub fn effective_path(uri: &Uri, base_path: &str) -> String {
    let override_path = uri.query().and_then(|query| {
        serde_urlencoded::from_str::<Vec<(String, String)>>(query)
            .ok()?
            .into_iter()
            .find(|(key, _)| key == "url")
            .map(|(_, value)| format!("/{}", value))
    });
    let path = override_path.unwrap_or_else(|| uri.path().to_string());

    let stripped = match path.strip_prefix(base_path) {
        Some(rest) if !base_path.is_empty() && (rest.is_empty() || rest.starts_with('/')) => {
            rest.to_string()
        }
        _ => path,
    };

    if stripped.is_empty() {
        "/".to_string()
    } else {
        with_leading_slash(&stripped)
    }
}

pub fn not_found(base_path: &str) -> Response {
    let body = format!(
        "<h1>404 - Page non trouvée</h1>\
         <p>La page que vous recherchez n'existe pas.</p>\
         <p><a href='{}/'>Retourner à l'accueil</a></p>",
        base_path
    );
    (StatusCode::NOT_FOUND, Html(body)).into_response()
}

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::error;

/// Logs every 5xx response. Error pages never carry the cause, so the request
/// line is what ties the log entry to the failure logged by the handler.
pub async fn log_errors(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;

    if response.status().is_server_error() {
        error!(
            %method,
            path = %path,
            status = response.status().as_u16(),
            "Server error response"
        );
    }

    response
}

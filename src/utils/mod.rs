use std::net::SocketAddr;

use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, Request, header},
};
use bcrypt::{hash, verify};
use sha2::{Digest, Sha256};

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password.as_bytes(), cost)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password.as_bytes(), hash)
}

/// Client address, preferring proxy headers over the socket peer.
pub fn client_ip<B>(req: &Request<B>) -> String {
    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    forwarded_ip(req.headers())
        .or(remote_ip)
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .map(|ip| ip.trim().to_string())
}

/// Hash of user agent and client address, stored with the session to detect reuse
/// of a session cookie from another client.
pub fn client_fingerprint<B>(req: &Request<B>) -> String {
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(client_ip(req).as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let exponent = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    format!("{:.1} {}", value, UNITS[exponent])
}

/// Keeps post-login redirects on this site: only absolute local paths are accepted.
pub fn local_redirect_target(target: Option<&str>) -> Option<String> {
    let target = target?.trim();
    if target.starts_with('/') && !target.starts_with("//") && !target.contains('\\') {
        Some(target.to_string())
    } else {
        None
    }
}

use axum::{
    extract::{ConnectInfo, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};

use crate::common::RequestMeta;

/// Middleware to collect caller evidence for the audit trail
///
/// IP priority:
/// 1. X-Forwarded-For header (for requests through proxies)
/// 2. X-Real-IP header (for Nginx)
/// 3. ConnectInfo socket address (direct connection)
///
/// Everything else is taken from request headers as-is; all fields are
/// best-effort and may be absent.
pub async fn extract_request_meta(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();

    let ip = if let Some(forwarded) = headers.get("x-forwarded-for") {
        forwarded
            .to_str()
            .ok()
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
    } else if let Some(real_ip) = headers.get("x-real-ip") {
        real_ip.to_str().ok().and_then(|s| s.parse::<IpAddr>().ok())
    } else {
        Some(addr.ip())
    };

    let meta = RequestMeta {
        ip_address: ip.map(|ip| ip.to_string()),
        user_agent: header_string(headers, "user-agent"),
        accept_language: header_string(headers, "accept-language"),
        device_fingerprint: header_string(headers, "x-device-fingerprint"),
        referrer: header_string(headers, "referer"),
    };

    request.extensions_mut().insert(meta);
    next.run(request).await
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

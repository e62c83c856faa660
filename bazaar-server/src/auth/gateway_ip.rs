//! Gateway callback source check

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use shared::error::{AppError, ErrorCode};

use crate::state::AppState;

/// Client IP as seen by this server
///
/// The TCP peer is authoritative. `X-Forwarded-For` is only read when the
/// peer is one of `trusted_proxies`; the chain is then walked right to left
/// and the first hop that is not itself a trusted proxy is the client.
pub fn client_ip(request: &Request, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())?;
    if !trusted_proxies.contains(&peer) {
        return Some(peer);
    }

    let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    else {
        return Some(peer);
    };

    let mut client = peer;
    for hop in forwarded.rsplit(',').map(str::trim) {
        // An unparsable hop ends the trusted part of the chain
        let Ok(ip) = hop.parse::<IpAddr>() else {
            break;
        };
        client = ip;
        if !trusted_proxies.contains(&ip) {
            break;
        }
    }
    Some(client)
}

/// Empty allowlist accepts every source
pub fn is_allowed(allowed: &[IpAddr], ip: Option<IpAddr>) -> bool {
    allowed.is_empty() || ip.is_some_and(|ip| allowed.contains(&ip))
}

pub async fn gateway_allowlist_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request, &state.trusted_proxy_ips);
    if !is_allowed(&state.gateway_allowed_ips, ip) {
        tracing::warn!(ip = ?ip, path = %request.uri().path(), "Gateway callback from unknown source");
        return AppError::new(ErrorCode::IpNotAllowed).into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(forwarded: Option<&str>, peer: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/api/payments/callback");
        if let Some(value) = forwarded {
            builder = builder.header("x-forwarded-for", value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            req.extensions_mut().insert(ConnectInfo(addr));
        }
        req
    }

    #[test]
    fn test_peer_is_authoritative_without_trusted_proxy() {
        // A caller cannot talk its way onto the allowlist with a header
        let req = request(Some("10.0.0.1"), Some("6.6.6.6:4444"));
        assert_eq!(client_ip(&req, &[]), Some("6.6.6.6".parse().unwrap()));

        let proxy: Vec<IpAddr> = vec!["10.1.1.1".parse().unwrap()];
        assert_eq!(client_ip(&req, &proxy), Some("6.6.6.6".parse().unwrap()));
    }

    #[test]
    fn test_forwarded_for_behind_trusted_proxy() {
        let proxies: Vec<IpAddr> = vec!["10.1.1.1".parse().unwrap(), "10.1.1.2".parse().unwrap()];

        let req = request(Some("185.1.2.3"), Some("10.1.1.1:5000"));
        assert_eq!(client_ip(&req, &proxies), Some("185.1.2.3".parse().unwrap()));

        // Left-most entries are client supplied; the right-most untrusted hop wins
        let req = request(Some("10.0.0.1, 185.1.2.3, 10.1.1.2"), Some("10.1.1.1:5000"));
        assert_eq!(client_ip(&req, &proxies), Some("185.1.2.3".parse().unwrap()));

        let req = request(None, Some("10.1.1.1:5000"));
        assert_eq!(client_ip(&req, &proxies), Some("10.1.1.1".parse().unwrap()));
    }

    #[test]
    fn test_no_peer_means_unknown_source() {
        assert_eq!(client_ip(&request(Some("185.1.2.3"), None), &[]), None);
    }

    #[test]
    fn test_allowlist() {
        let allowed: Vec<IpAddr> = vec!["185.1.2.3".parse().unwrap()];
        assert!(is_allowed(&allowed, Some("185.1.2.3".parse().unwrap())));
        assert!(!is_allowed(&allowed, Some("1.1.1.1".parse().unwrap())));
        assert!(!is_allowed(&allowed, None));
        assert!(is_allowed(&[], None));
    }
}

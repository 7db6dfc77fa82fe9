use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderMap;
use relay_config::ClientIpConfig;

/// Resolved address of the caller, stored in request extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub IpAddr);

/// Middleware that resolves the caller's address
pub async fn client_ip_middleware(config: ClientIpConfig, mut request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if let Some(ip) = resolve(&config, request.headers(), peer) {
        request.extensions_mut().insert(ClientAddr(ip));
    }

    next.run(request).await
}

/// Client address from proxy headers, falling back to the socket peer
///
/// With `trusted_hops = n`, the n-th `X-Forwarded-For` entry from the right
/// is the client: everything to its right was appended by trusted proxies.
/// Proxy headers are ignored entirely when no hop is trusted.
pub fn resolve(config: &ClientIpConfig, headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    if config.trusted_hops == 0 {
        return peer;
    }

    let forwarded = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect::<Vec<_>>();

    if !forwarded.is_empty() {
        let index = forwarded.len().saturating_sub(config.trusted_hops);
        if let Some(ip) = forwarded.get(index).and_then(|entry| parse(entry)) {
            return Some(ip);
        }
    }

    if let Some(real_ip) = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| parse(value.trim()))
    {
        return Some(real_ip);
    }

    peer
}

/// Accepts bare addresses and `ip:port` forms
fn parse(entry: &str) -> Option<IpAddr> {
    entry
        .parse::<IpAddr>()
        .ok()
        .or_else(|| entry.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

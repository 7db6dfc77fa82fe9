use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use relay_core::{Authentication, RequestContext};

use crate::client_ip::ClientAddr;

/// Middleware that builds the [`RequestContext`] handlers receive
///
/// Collects what the client-address and classification layers stored in
/// the request extensions.
pub async fn request_context_middleware(mut request: Request, next: Next) -> Response {
    let client_ip = request.extensions().get::<ClientAddr>().map(|ClientAddr(ip)| *ip);
    let authentication = request.extensions().get::<Authentication>().cloned().unwrap_or_default();

    request.extensions_mut().insert(RequestContext {
        client_ip,
        authentication,
    });

    next.run(request).await
}

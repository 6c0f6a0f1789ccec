//! HTTP routing for the WebDAV endpoint.
//!
//! Every request goes through one fallback handler: the path is resolved
//! first so malformed paths never reach `dav-server`, write methods are
//! refused by middleware, and archive failures reported during the request
//! turn the protocol library's generic 500 into a 502.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{from_fn, Next},
    response::{IntoResponse, Response},
    Router,
};
use dandidav_core::{resolve, AdapterError, ProviderError};
use dandidav_storage::NamespaceProvider;
use dav_server::{DavHandler, DavMethodSet};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::dav::{track_upstream, ArchiveDavFs};

/// Methods that would modify the archive.
pub const WRITE_METHODS: &[&str] = &[
    "PUT", "DELETE", "MKCOL", "MOVE", "COPY", "PROPPATCH", "LOCK", "UNLOCK", "POST",
];

/// Value of the `Allow` header on refused requests.
pub const ALLOWED_METHODS: &str = "GET, HEAD, OPTIONS, PROPFIND";

/// WebDAV compliance class advertised in the `DAV` header. Locking is not
/// supported, so only class 1 applies.
pub const DAV_COMPLIANCE: &str = "1";

const DAV_HEADER: &str = "dav";

/// Shared state for the WebDAV handler.
#[derive(Clone)]
pub struct DavState {
    provider: Arc<NamespaceProvider>,
    dav: DavHandler,
}

impl DavState {
    pub fn new(provider: Arc<NamespaceProvider>) -> Self {
        let dav = DavHandler::builder()
            .filesystem(Box::new(ArchiveDavFs::new(Arc::clone(&provider))))
            .methods(DavMethodSet::WEBDAV_RO)
            .build_handler();
        Self { provider, dav }
    }

    pub fn provider(&self) -> &Arc<NamespaceProvider> {
        &self.provider
    }
}

/// Build the application router.
pub fn create_router(provider: Arc<NamespaceProvider>) -> Router {
    Router::new()
        .fallback(handle_dav)
        .with_state(DavState::new(provider))
        .layer(from_fn(reject_writes))
        .layer(TraceLayer::new_for_http())
}

/// Refuse write methods before they reach the filesystem.
pub async fn reject_writes(request: Request, next: Next) -> Response {
    if WRITE_METHODS.contains(&request.method().as_str()) {
        debug!(
            method = %request.method(),
            path = request.uri().path(),
            "refusing write method"
        );
        return method_not_allowed("this server is read-only");
    }
    next.run(request).await
}

async fn handle_dav(State(state): State<DavState>, request: Request) -> Response {
    let address = match resolve(request.uri().path()) {
        Ok(address) => address,
        Err(err) => {
            debug!(error = %err, "rejected request path");
            return error_response(err.status_code(), err.to_string());
        }
    };

    // GET and HEAD are answered only for assets; the content type comes
    // from the archive rather than the file extension.
    let method = request.method().clone();
    let content_type = if method == Method::GET || method == Method::HEAD {
        match state.provider.resource(&address).await {
            Ok(resource) if resource.is_collection() => {
                let err = AdapterError::NotAnAsset {
                    name: resource.name().to_string(),
                };
                debug!(%address, "GET on a collection");
                return method_not_allowed(&err.to_string());
            }
            Ok(resource) => resource.content_type().map(str::to_string),
            Err(err) => return provider_error_response(&err),
        }
    } else {
        None
    };

    let (response, upstream_failed) = track_upstream(state.dav.handle(request)).await;
    let mut response = response.map(Body::new);

    if upstream_failed && response.status() == StatusCode::INTERNAL_SERVER_ERROR {
        *response.status_mut() = StatusCode::BAD_GATEWAY;
    }
    if method == Method::OPTIONS && response.status().is_success() {
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    }
    if method == Method::OPTIONS || response.headers().contains_key(DAV_HEADER) {
        response.headers_mut().insert(
            HeaderName::from_static(DAV_HEADER),
            HeaderValue::from_static(DAV_COMPLIANCE),
        );
    }
    if let Some(content_type) = content_type {
        if response.status().is_success() {
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
        }
    }
    response
}

fn provider_error_response(err: &ProviderError) -> Response {
    if err.is_upstream() {
        warn!(error = %err, "archive unavailable");
    }
    error_response(err.status_code(), err.to_string())
}

fn error_response(status: u16, message: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, message).into_response()
}

fn method_not_allowed(message: &str) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, ALLOWED_METHODS)],
        message.to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_methods_exclude_reads() {
        for method in ["GET", "HEAD", "OPTIONS", "PROPFIND"] {
            assert!(!WRITE_METHODS.contains(&method));
            assert!(ALLOWED_METHODS.contains(method));
        }
    }

    #[test]
    fn test_error_response_status() {
        assert_eq!(
            error_response(502, "down".to_string()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_response(1000, "bogus".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_dav_compliance_excludes_locking() {
        assert_eq!(DAV_COMPLIANCE, "1");
        assert_eq!(HeaderName::from_static(DAV_HEADER), "dav");
    }

    #[test]
    fn test_method_not_allowed_advertises_reads() {
        let response = method_not_allowed("read-only");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers().get(header::ALLOW).unwrap(),
            ALLOWED_METHODS
        );
    }
}

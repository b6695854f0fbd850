//! Page pipeline middleware.
//!
//! GET requests are offered to the page directory first. Paths no page claims
//! fall through to the router untouched.

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderName, Method, Request,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::instrument;

use crate::application::error::HttpError;
use crate::application::wcm::WcmOutcome;
use crate::domain::descriptor::IncomingRequest;

use super::{HttpState, request_host};

const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-pagina-cache");
const FORWARDED_PROTO_HEADER: &str = "x-forwarded-proto";

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn wcm_layer(
    State(state): State<HttpState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.wcm.is_enabled()
        || request.method() != Method::GET
        || is_reserved(request.uri().path())
    {
        return next.run(request).await;
    }

    let incoming = incoming_request(&request);
    let ctx = state.context_for(&incoming.host);

    match state.wcm.handle(&ctx, &incoming).await {
        Ok(WcmOutcome::NotHandled) => next.run(request).await,
        Ok(WcmOutcome::Cached(body)) => page_response(body, "hit"),
        Ok(WcmOutcome::Rendered(body)) => page_response(body, "miss"),
        Err(err) => HttpError::from(err).into_response(),
    }
}

/// Service endpoints under `/_` are never page routes.
fn is_reserved(path: &str) -> bool {
    path.starts_with("/_")
}

fn incoming_request(request: &Request<Body>) -> IncomingRequest {
    let uri = request.uri();
    let headers = request.headers();

    let protocol = headers
        .get(FORWARDED_PROTO_HEADER)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.scheme_str())
        .unwrap_or("http")
        .to_string();

    IncomingRequest::new(protocol, request_host(uri, headers), uri.path())
        .with_query(uri.query())
        .with_headers(
            headers
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value))),
        )
}

fn page_response(body: Bytes, cache_status: &'static str) -> Response {
    (
        [
            (CONTENT_TYPE, "text/html; charset=utf-8"),
            (CACHE_CONTROL, "no-cache"),
            (CACHE_STATUS_HEADER, cache_status),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_request_keeps_descriptor_inputs() {
        let request = Request::builder()
            .uri("/blog/first?lang=en&invalidate")
            .header("host", "example.com:3000")
            .header("accept-language", "en-US")
            .header("user-agent", "test")
            .header(FORWARDED_PROTO_HEADER, "https")
            .body(Body::empty())
            .expect("request");

        let incoming = incoming_request(&request);
        assert_eq!(incoming.protocol, "https");
        assert_eq!(incoming.host, "example.com");
        assert_eq!(incoming.path, "/blog/first");
        assert_eq!(incoming.params.get("lang").map(String::as_str), Some("en"));
        assert!(incoming.invalidate);
        assert!(incoming.headers.contains_key("accept-language"));
        assert!(!incoming.headers.contains_key("user-agent"));
    }

    #[test]
    fn service_paths_are_reserved() {
        assert!(is_reserved("/_health"));
        assert!(is_reserved("/_modules/_deploy"));
        assert!(!is_reserved("/blog/_draft"));
    }
}

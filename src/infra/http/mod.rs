mod middleware;
mod modules;
mod wcm;

pub use middleware::RequestContext;
pub use wcm::wcm_layer;

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderMap, StatusCode, Uri, header::HOST},
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::{modules::ModuleService, wcm::WcmService};
use crate::domain::types::BranchContext;

use self::middleware::{log_responses, set_request_context};

/// Host used when neither the URI nor the `Host` header names one.
const FALLBACK_HOST: &str = "localhost";

#[derive(Clone)]
pub struct HttpState {
    pub wcm: Arc<WcmService>,
    pub modules: Arc<ModuleService>,
    pub repository_id: Arc<str>,
    pub branch_id: Arc<str>,
}

impl HttpState {
    /// Scope a request for `host` to the configured repository branch.
    pub fn context_for(&self, host: &str) -> BranchContext {
        BranchContext::new(host, &*self.repository_id, &*self.branch_id)
    }
}

pub fn build_router(state: HttpState) -> Router {
    let module_routes = Router::new()
        .route("/_modules/_deploy", post(modules::deploy))
        .route("/_modules/_undeploy", post(modules::undeploy))
        .route("/_modules/_redeploy", post(modules::redeploy))
        .route("/_modules/_refresh", post(modules::refresh))
        .route("/_modules/{module_id}/{*path}", get(modules::asset));

    Router::new()
        .route("/_health", get(health))
        .merge(module_routes)
        .fallback(not_found)
        .layer(axum_middleware::from_fn_with_state(state.clone(), wcm_layer))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Host a request was routed to, without its port.
pub(crate) fn request_host(uri: &Uri, headers: &HeaderMap) -> String {
    uri.host()
        .map(str::to_string)
        .or_else(|| {
            headers
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .map(strip_port)
        })
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| FALLBACK_HOST.to_string())
}

fn strip_port(host: &str) -> String {
    match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            name.to_string()
        }
        _ => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn host_comes_from_uri_then_header() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("example.com:8080"));

        let absolute: Uri = "http://other.com/a".parse().expect("uri");
        assert_eq!(request_host(&absolute, &headers), "other.com");

        let relative: Uri = "/a".parse().expect("uri");
        assert_eq!(request_host(&relative, &headers), "example.com");
        assert_eq!(request_host(&relative, &HeaderMap::new()), "localhost");
    }

    #[test]
    fn strip_port_keeps_ipv6_brackets() {
        assert_eq!(strip_port("[::1]:3000"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("example.com"), "example.com");
    }
}

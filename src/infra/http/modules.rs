//! `/_modules` endpoints.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, Uri, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::error::ErrorReport;
use crate::application::modules::ModuleError;

use super::{HttpState, request_host};

const SOURCE: &str = "infra::http::modules";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct ModuleQuery {
    id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ModuleResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub(super) async fn deploy(
    State(state): State<HttpState>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<ModuleQuery>,
    body: Bytes,
) -> Response {
    let host = request_host(&uri, &headers);
    let config = match parse_config(&body) {
        Ok(config) => config,
        Err(err) => return module_response(&host, false, Err(err)),
    };

    let result = state
        .modules
        .deploy(&host, query.id.as_deref(), config.as_ref())
        .await;
    module_response(&host, true, result)
}

pub(super) async fn undeploy(
    State(state): State<HttpState>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<ModuleQuery>,
) -> Response {
    let host = request_host(&uri, &headers);
    let result = state.modules.undeploy(&host, query.id.as_deref()).await;
    module_response(&host, false, result)
}

pub(super) async fn redeploy(
    State(state): State<HttpState>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<ModuleQuery>,
    body: Bytes,
) -> Response {
    let host = request_host(&uri, &headers);
    let config = match parse_config(&body) {
        Ok(config) => config,
        Err(err) => return module_response(&host, false, Err(err)),
    };

    let result = state
        .modules
        .redeploy(&host, query.id.as_deref(), config.as_ref())
        .await;
    module_response(&host, true, result)
}

pub(super) async fn refresh(
    State(state): State<HttpState>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let host = request_host(&uri, &headers);
    let result = state.modules.refresh(&host).await;
    module_response(&host, false, result)
}

pub(super) async fn asset(
    State(state): State<HttpState>,
    uri: Uri,
    headers: HeaderMap,
    Path((module_id, path)): Path<(String, String)>,
) -> Response {
    let host = request_host(&uri, &headers);
    match state.modules.asset(&host, &module_id, &path).await {
        Ok(Some(bytes)) => ([(CONTENT_TYPE, content_type_for(&path))], bytes).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => error_response(err),
    }
}

/// An empty body means "no config"; anything else must be JSON.
fn parse_config(body: &Bytes) -> Result<Option<Value>, ModuleError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|err| ModuleError::invalid(format!("Module config is not valid JSON: {err}")))
}

fn module_response(host: &str, echo_host: bool, result: Result<(), ModuleError>) -> Response {
    match result {
        Ok(()) => Json(ModuleResponse {
            ok: true,
            host: echo_host.then(|| host.to_string()),
            message: None,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: ModuleError) -> Response {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let body = ModuleResponse {
        ok: false,
        host: None,
        message: Some(err.to_string()),
    };
    let mut response = (status, Json(body)).into_response();
    ErrorReport::from_error(SOURCE, status, &err).attach(&mut response);
    response
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("js") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("html") => "text/html; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_body_is_no_config() {
        assert_eq!(parse_config(&Bytes::from_static(b"  \n")).expect("blank"), None);
        assert!(parse_config(&Bytes::from_static(b"{")).is_err());
        assert!(
            parse_config(&Bytes::from_static(br#"{"source":{}}"#))
                .expect("json")
                .is_some()
        );
    }

    #[test]
    fn asset_content_types() {
        assert_eq!(content_type_for("index.js"), "text/javascript; charset=utf-8");
        assert_eq!(content_type_for("LICENSE"), "application/octet-stream");
    }
}

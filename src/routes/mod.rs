//! HTTP routes for Accolade
//!
//! The server buffers each request body once (`collect_request`) and the
//! handlers work on `Request<Bytes>`. Success bodies use the
//! `{"status": "success", "data": ...}` envelope; failures are
//! `{"error": ..., "code": ...}` with the status from `AccoladeError`.

pub mod achievements;
pub mod auth_routes;
pub mod health;
pub mod lecturers;
pub mod reports;
pub mod students;
pub mod users;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, warn};

use crate::types::{AccoladeError, Result};

pub use achievements::handle_achievement_request;
pub use auth_routes::handle_auth_request;
pub use health::{health_check, version_info};
pub use lecturers::handle_lecturer_request;
pub use reports::handle_report_request;
pub use students::handle_student_request;
pub use users::handle_user_request;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Largest accepted JSON request body
pub const MAX_JSON_BODY: usize = 64 * 1024;

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    status: &'static str,
    data: &'a T,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    code: &'a str,
}

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

fn with_cors(mut response: Response<BoxBody>) -> Response<BoxBody> {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}

/// Serialize `body` as-is
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(full_body(json));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    with_cors(response)
}

/// Wrap `data` in the success envelope
pub fn success<T: Serialize>(status: StatusCode, data: &T) -> Response<BoxBody> {
    json_response(
        status,
        &Envelope {
            status: "success",
            data,
        },
    )
}

pub fn error_response(err: &AccoladeError) -> Response<BoxBody> {
    let status = err.status_code();
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        warn!("Request rejected: {}", err);
    }
    json_response(
        status,
        &ErrorBody {
            error: err.to_string(),
            code: err.code(),
        },
    )
}

/// Collapse a handler result into a response
pub fn respond<T: Serialize>(status: StatusCode, result: Result<T>) -> Response<BoxBody> {
    match result {
        Ok(data) => success(status, &data),
        Err(e) => error_response(&e),
    }
}

pub fn cors_preflight() -> Response<BoxBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    with_cors(response)
}

pub fn method_not_allowed() -> Response<BoxBody> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ErrorBody {
            error: "Method not allowed".into(),
            code: "METHOD_NOT_ALLOWED",
        },
    )
}

pub fn not_found(path: &str) -> Response<BoxBody> {
    json_response(
        StatusCode::NOT_FOUND,
        &ErrorBody {
            error: format!("No route for {path}"),
            code: "NOT_FOUND",
        },
    )
}

pub fn auth_header<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Buffer the request body, failing with `Validation` past `limit` bytes
pub async fn collect_request<B>(req: Request<B>, limit: usize) -> Result<Request<Bytes>>
where
    B: hyper::body::Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let collected = Limited::new(body, limit).collect().await.map_err(|e| {
        if e.is::<http_body_util::LengthLimitError>() {
            AccoladeError::Validation(format!("request body exceeds {limit} bytes"))
        } else {
            AccoladeError::Validation(format!("failed to read body: {e}"))
        }
    })?;
    Ok(Request::from_parts(parts, collected.to_bytes()))
}

pub fn parse_json_body<T: DeserializeOwned>(req: &Request<Bytes>) -> Result<T> {
    let body = req.body();
    if body.len() > MAX_JSON_BODY {
        return Err(AccoladeError::Validation(format!(
            "JSON body exceeds {MAX_JSON_BODY} bytes"
        )));
    }
    serde_json::from_slice(body)
        .map_err(|e| AccoladeError::Validation(format!("invalid JSON body: {e}")))
}

/// Decode the query string into `T`; an absent query decodes as empty
pub fn parse_query<T: DeserializeOwned, B>(req: &Request<B>) -> Result<T> {
    serde_urlencoded::from_str(req.uri().query().unwrap_or(""))
        .map_err(|e| AccoladeError::Validation(format!("invalid query string: {e}")))
}

/// Split `/api/v1/<prefix>/a/b` into `["a", "b"]`
pub fn path_segments<'a>(path: &'a str, prefix: &str) -> Option<Vec<&'a str>> {
    let rest = path.strip_prefix(prefix)?;
    if !(rest.is_empty() || rest.starts_with('/')) {
        return None;
    }
    Some(rest.split('/').filter(|s| !s.is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_segments() {
        assert_eq!(
            path_segments("/api/v1/achievements/abc/submit", "/api/v1/achievements"),
            Some(vec!["abc", "submit"])
        );
        assert_eq!(
            path_segments("/api/v1/achievements", "/api/v1/achievements"),
            Some(vec![])
        );
        assert_eq!(path_segments("/api/v1/achievementsx", "/api/v1/achievements"), None);
    }

    #[test]
    fn test_error_body_shape() {
        let response = error_response(&AccoladeError::InvalidState("already submitted".into()));
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_collect_request_limit() {
        let req = Request::new(Full::new(Bytes::from(vec![0u8; 32])));
        assert!(matches!(
            collect_request(req, 16).await,
            Err(AccoladeError::Validation(_))
        ));

        let req = Request::new(Full::new(Bytes::from_static(b"{\"note\":\"ok\"}")));
        let req = collect_request(req, 1024).await.unwrap();
        let value: serde_json::Value = parse_json_body(&req).unwrap();
        assert_eq!(value["note"], "ok");
    }

    #[test]
    fn test_parse_query() {
        #[derive(serde::Deserialize)]
        struct Q {
            status: Option<String>,
        }
        let req = Request::builder()
            .uri("/api/v1/achievements?status=submitted")
            .body(())
            .unwrap();
        let q: Q = parse_query(&req).unwrap();
        assert_eq!(q.status.as_deref(), Some("submitted"));

        let req = Request::builder().uri("/api/v1/achievements").body(()).unwrap();
        let q: Q = parse_query(&req).unwrap();
        assert!(q.status.is_none());
    }
}

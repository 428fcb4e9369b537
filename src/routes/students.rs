//! Student directory routes (`user:manage`)
//!
//! - GET /api/v1/students                  - every student with name and advisor
//! - GET /api/v1/students/{id}             - one student (profile id)
//! - PUT /api/v1/students/{id}/advisor     - `{"advisorId": <lecturer id | null>}`

use bytes::Bytes;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    auth_header, cors_preflight, method_not_allowed, not_found, parse_json_body, path_segments,
    respond, BoxBody,
};
use crate::auth::Permission;
use crate::db::StudentSummary;
use crate::server::AppState;
use crate::types::{AccoladeError, Result};

const PREFIX: &str = "/api/v1/students";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorAssignment {
    pub advisor_id: Option<Uuid>,
}

fn student_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| AccoladeError::NotFound(format!("student {id}")))
}

async fn handle_list(req: &Request<Bytes>, state: &AppState) -> Result<Vec<StudentSummary>> {
    state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::UserManage])?;
    state.accounts.list_students().await
}

async fn handle_get(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<StudentSummary> {
    state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::UserManage])?;
    state.accounts.student(student_id(id)?).await
}

async fn handle_advisor(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<StudentSummary> {
    state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::UserManage])?;
    let id = student_id(id)?;
    let body: AdvisorAssignment = parse_json_body(req)?;
    state.accounts.set_advisor(id, body.advisor_id).await
}

pub async fn handle_student_request(
    req: Request<Bytes>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    let segments = path_segments(&path, PREFIX)?;
    let method = req.method().clone();

    let response = match (&method, segments.as_slice()) {
        (&Method::OPTIONS, _) => cors_preflight(),
        (&Method::GET, []) => respond(StatusCode::OK, handle_list(&req, &state).await),
        (&Method::GET, [id]) => respond(StatusCode::OK, handle_get(&req, &state, id).await),
        (&Method::PUT, [id, "advisor"]) => {
            respond(StatusCode::OK, handle_advisor(&req, &state, id).await)
        }
        (_, []) | (_, [_]) | (_, [_, "advisor"]) => method_not_allowed(),
        _ => not_found(&path),
    };
    Some(response)
}

//! Lecturer directory routes
//!
//! - GET /api/v1/lecturers                 - every lecturer (`user:manage`)
//! - GET /api/v1/lecturers/{id}/advisees   - students advised by one lecturer;
//!   admins, or the lecturer themself

use bytes::Bytes;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use uuid::Uuid;

use super::{auth_header, cors_preflight, method_not_allowed, not_found, path_segments, respond, BoxBody};
use crate::auth::Permission;
use crate::db::{LecturerSummary, StudentSummary};
use crate::server::AppState;
use crate::types::{AccoladeError, Result};

const PREFIX: &str = "/api/v1/lecturers";

async fn handle_list(req: &Request<Bytes>, state: &AppState) -> Result<Vec<LecturerSummary>> {
    state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::UserManage])?;
    state.accounts.list_lecturers().await
}

async fn handle_advisees(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<Vec<StudentSummary>> {
    let identity = state.gate.authorize(
        auth_header(req).as_deref(),
        &[Permission::UserManage, Permission::AchievementVerify],
    )?;
    let lecturer_id =
        Uuid::parse_str(id).map_err(|_| AccoladeError::NotFound(format!("lecturer {id}")))?;

    if !identity.can(Permission::UserManage) {
        let own = state.accounts.profile(identity.account_id).await?.lecturer;
        if own.map(|l| l.id) != Some(lecturer_id) {
            return Err(AccoladeError::Forbidden(
                "advisees of another lecturer".into(),
            ));
        }
    }
    state.accounts.advisees(lecturer_id).await
}

pub async fn handle_lecturer_request(
    req: Request<Bytes>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    let segments = path_segments(&path, PREFIX)?;
    let method = req.method().clone();

    let response = match (&method, segments.as_slice()) {
        (&Method::OPTIONS, _) => cors_preflight(),
        (&Method::GET, []) => respond(StatusCode::OK, handle_list(&req, &state).await),
        (&Method::GET, [id, "advisees"]) => {
            respond(StatusCode::OK, handle_advisees(&req, &state, id).await)
        }
        (_, []) | (_, [_, "advisees"]) => method_not_allowed(),
        _ => not_found(&path),
    };
    Some(response)
}

//! Report routes
//!
//! - GET /api/v1/reports/statistics           - overall counts (`report:read`)
//! - GET /api/v1/reports/student/{studentId}  - one student's counts
//!   (`report:read`, or the student themself)

use bytes::Bytes;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::debug;

use super::{
    auth_header, cors_preflight, method_not_allowed, not_found, path_segments, respond, BoxBody,
};
use crate::auth::Permission;
use crate::reports::{ReportStatistics, StudentReport};
use crate::server::AppState;
use crate::types::{AccoladeError, Result};

const PREFIX: &str = "/api/v1/reports";

async fn handle_statistics(req: &Request<Bytes>, state: &AppState) -> Result<ReportStatistics> {
    state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::ReportRead])?;
    state.reports.statistics().await
}

async fn handle_student(req: &Request<Bytes>, state: &AppState, student_number: &str) -> Result<StudentReport> {
    let identity = state.gate.authorize(
        auth_header(req).as_deref(),
        &[Permission::ReportRead, Permission::AchievementCreate],
    )?;

    if !identity.can(Permission::ReportRead) {
        let own = state.coordinator.student_for(identity.account_id).await?;
        if own.map_or(true, |s| s.student_id != student_number) {
            return Err(AccoladeError::Forbidden(
                "students may only read their own report".into(),
            ));
        }
    }

    let mut report = state.reports.student(student_number).await?;
    match state.accounts.profile(report.user_id).await {
        Ok(profile) => report.name = Some(profile.full_name),
        Err(e) => debug!("No account name for student {}: {}", student_number, e),
    }
    Ok(report)
}

pub async fn handle_report_request(
    req: Request<Bytes>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    let segments = path_segments(&path, PREFIX)?;
    let method = req.method().clone();

    let response = match (&method, segments.as_slice()) {
        (&Method::OPTIONS, _) => cors_preflight(),
        (&Method::GET, ["statistics"]) => respond(StatusCode::OK, handle_statistics(&req, &state).await),
        (&Method::GET, ["student", number]) => {
            respond(StatusCode::OK, handle_student(&req, &state, number).await)
        }
        (_, ["statistics"]) | (_, ["student", _]) => method_not_allowed(),
        _ => not_found(&path),
    };
    Some(response)
}

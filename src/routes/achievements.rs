//! Achievement routes
//!
//! - POST   /api/v1/achievements                    - create a draft
//! - GET    /api/v1/achievements                    - role-scoped list
//! - GET    /api/v1/achievements/{id}               - detail
//! - PUT    /api/v1/achievements/{id}               - edit a draft
//! - DELETE /api/v1/achievements/{id}               - soft delete a draft
//! - POST   /api/v1/achievements/{id}/submit        - draft -> submitted
//! - POST   /api/v1/achievements/{id}/verify        - submitted -> verified
//! - POST   /api/v1/achievements/{id}/reject        - submitted -> rejected
//! - GET    /api/v1/achievements/{id}/history       - status and audit stamps
//! - POST   /api/v1/achievements/{id}/attachments   - multipart upload, part `file`
//! - GET    /api/v1/achievements/{id}/consistency   - both stores' status
//! - GET    /api/v1/admin/inconsistencies           - every mismatched pair

use bytes::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;

use super::{
    auth_header, cors_preflight, method_not_allowed, not_found, parse_json_body,
    parse_query, path_segments, respond, BoxBody,
};
use crate::achievement::{
    Achievement, AchievementPatch, AchievementRecord, AchievementStatus, AttachmentUpload,
    ConsistencyReport, NewAchievement, StatusSnapshot,
};
use crate::auth::{Identity, Permission};
use crate::server::AppState;
use crate::store::AchievementFilter;
use crate::types::{AccoladeError, Result};

const PREFIX: &str = "/api/v1/achievements";
const INCONSISTENCIES: &str = "/api/v1/admin/inconsistencies";

/// Form field carrying the uploaded file
const FILE_FIELD: &str = "file";

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub note: String,
}

#[derive(Debug, Serialize)]
pub struct InconsistencyList {
    pub count: usize,
    pub items: Vec<ConsistencyReport>,
}

/// Which achievements a caller may list
async fn list_filter(state: &AppState, identity: &Identity, query: ListQuery) -> Result<AchievementFilter> {
    let requested = query
        .status
        .as_deref()
        .map(|s| s.parse::<AchievementStatus>().map_err(AccoladeError::Validation))
        .transpose()?;
    if requested == Some(AchievementStatus::Deleted) {
        return Err(AccoladeError::Validation("deleted achievements are not listed".into()));
    }

    if identity.can(Permission::AchievementCreate) {
        if let Some(student) = state.coordinator.student_for(identity.account_id).await? {
            let statuses = match requested {
                Some(status) => vec![status],
                None => AchievementStatus::ALL
                    .iter()
                    .copied()
                    .filter(|s| *s != AchievementStatus::Deleted)
                    .collect(),
            };
            return Ok(AchievementFilter {
                student_ids: Some(vec![student.student_id]),
                statuses: Some(statuses),
            });
        }
    }

    if identity.can(Permission::AchievementVerify) {
        return Ok(AchievementFilter::with_status(
            requested.unwrap_or(AchievementStatus::Verified),
        ));
    }
    Ok(AchievementFilter::with_status(AchievementStatus::Verified))
}

/// Verified achievements are public to readers; anything else is visible to
/// its owner and to verifiers/admins. Deleted ones are only visible to admins.
async fn ensure_visible(state: &AppState, identity: &Identity, achievement: &Achievement) -> Result<()> {
    let hidden = || AccoladeError::NotFound(format!("achievement {}", achievement.id));
    if identity.can(Permission::UserManage) {
        return Ok(());
    }
    if achievement.status == AchievementStatus::Deleted {
        return Err(hidden());
    }
    if achievement.status == AchievementStatus::Verified || identity.can(Permission::AchievementVerify) {
        return Ok(());
    }
    match state.coordinator.student_for(identity.account_id).await? {
        Some(student) if student.student_id == achievement.student_id => Ok(()),
        _ => Err(hidden()),
    }
}

async fn handle_create(req: &Request<Bytes>, state: &AppState) -> Result<AchievementRecord> {
    let identity = state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::AchievementCreate])?;
    let content: NewAchievement = parse_json_body(req)?;
    state.coordinator.create(identity.account_id, content).await
}

async fn handle_list(req: &Request<Bytes>, state: &AppState) -> Result<Vec<Achievement>> {
    let identity = state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::AchievementRead])?;
    let filter = list_filter(state, &identity, parse_query(req)?).await?;
    state.coordinator.list(&filter).await
}

async fn handle_get(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<Achievement> {
    let identity = state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::AchievementRead])?;
    let achievement = state.coordinator.get(id).await?;
    ensure_visible(state, &identity, &achievement).await?;
    Ok(achievement)
}

async fn handle_update(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<Achievement> {
    let identity = state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::AchievementUpdate])?;
    let patch: AchievementPatch = parse_json_body(req)?;
    state.coordinator.update(id, identity.account_id, patch).await
}

async fn handle_delete(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<AchievementRecord> {
    let identity = state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::AchievementDelete])?;
    state.coordinator.delete(id, identity.account_id).await
}

async fn handle_submit(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<AchievementRecord> {
    let identity = state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::AchievementUpdate])?;
    state.coordinator.submit(id, identity.account_id).await
}

async fn handle_verify(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<AchievementRecord> {
    let identity = state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::AchievementVerify])?;
    state.coordinator.verify(id, identity.account_id).await
}

async fn handle_reject(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<AchievementRecord> {
    let identity = state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::AchievementVerify])?;
    let body: RejectRequest = parse_json_body(req)?;
    state.coordinator.reject(id, identity.account_id, &body.note).await
}

async fn handle_history(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<StatusSnapshot> {
    let identity = state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::AchievementRead])?;
    let achievement = state.coordinator.get(id).await?;
    ensure_visible(state, &identity, &achievement).await?;
    state.coordinator.status_history(id).await
}

fn multipart_error(e: multer::Error) -> AccoladeError {
    AccoladeError::Validation(format!("malformed multipart body: {e}"))
}

/// Pull the `file` part out of a buffered multipart/form-data body
async fn read_file_part(req: &Request<Bytes>) -> Result<AttachmentUpload> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AccoladeError::Validation("multipart/form-data body is required".into()))?;
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| AccoladeError::Validation(format!("expected multipart/form-data: {e}")))?;

    let body = req.body().clone();
    let stream = futures_util::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field
            .file_name()
            .filter(|f| !f.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| AccoladeError::Validation("file part has no filename".into()))?;
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(AttachmentUpload::new(file_name, bytes));
    }
    Err(AccoladeError::Validation(format!(
        "multipart body has no `{FILE_FIELD}` part"
    )))
}

async fn handle_upload(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<Achievement> {
    let identity = state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::AchievementUpdate])?;
    let upload = read_file_part(req).await?;
    state
        .coordinator
        .add_attachment(id, identity.account_id, upload)
        .await
}

async fn handle_consistency(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<ConsistencyReport> {
    state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::UserManage])?;
    state.reconciler.check(id).await
}

async fn handle_inconsistencies(req: &Request<Bytes>, state: &AppState) -> Result<InconsistencyList> {
    let identity = state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::UserManage])?;
    let items = state.reconciler.scan().await?;
    info!(account = %identity.account_id, found = items.len(), "Consistency scan requested");
    Ok(InconsistencyList {
        count: items.len(),
        items,
    })
}

/// Handle achievement requests.
///
/// Returns None if the path is not an achievement route.
pub async fn handle_achievement_request(
    req: Request<Bytes>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    if path == INCONSISTENCIES {
        return Some(match method {
            Method::OPTIONS => cors_preflight(),
            Method::GET => respond(StatusCode::OK, handle_inconsistencies(&req, &state).await),
            _ => method_not_allowed(),
        });
    }

    let segments = path_segments(&path, PREFIX)?;
    if method == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let response = match (&method, segments.as_slice()) {
        (&Method::POST, []) => respond(StatusCode::CREATED, handle_create(&req, &state).await),
        (&Method::GET, []) => respond(StatusCode::OK, handle_list(&req, &state).await),
        (_, []) => method_not_allowed(),

        (&Method::GET, [id]) => respond(StatusCode::OK, handle_get(&req, &state, id).await),
        (&Method::PUT, [id]) => respond(StatusCode::OK, handle_update(&req, &state, id).await),
        (&Method::DELETE, [id]) => respond(StatusCode::OK, handle_delete(&req, &state, id).await),
        (_, [_]) => method_not_allowed(),

        (&Method::POST, [id, "submit"]) => respond(StatusCode::OK, handle_submit(&req, &state, id).await),
        (&Method::POST, [id, "verify"]) => respond(StatusCode::OK, handle_verify(&req, &state, id).await),
        (&Method::POST, [id, "reject"]) => respond(StatusCode::OK, handle_reject(&req, &state, id).await),
        (&Method::GET, [id, "history"]) => respond(StatusCode::OK, handle_history(&req, &state, id).await),
        (&Method::POST, [id, "attachments"]) => {
            respond(StatusCode::CREATED, handle_upload(&req, &state, id).await)
        }
        (&Method::GET, [id, "consistency"]) => {
            respond(StatusCode::OK, handle_consistency(&req, &state, id).await)
        }
        (_, [_, "submit" | "verify" | "reject" | "history" | "attachments" | "consistency"]) => {
            method_not_allowed()
        }

        _ => not_found(&path),
    };
    Some(response)
}


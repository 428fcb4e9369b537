//! User administration routes (`user:manage`)
//!
//! - POST   /api/v1/users                 - create a user, optionally with a
//!   student or lecturer profile
//! - GET    /api/v1/users                 - list users
//! - GET    /api/v1/users/{id}            - one user
//! - PUT    /api/v1/users/{id}            - edit name, email, username, isActive
//! - DELETE /api/v1/users/{id}            - remove a user and its profile
//! - PUT    /api/v1/users/{id}/role       - change role
//! - PUT    /api/v1/users/{id}/password   - reset password

use bytes::Bytes;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{
    auth_header, cors_preflight, method_not_allowed, not_found, parse_json_body, path_segments,
    respond, BoxBody,
};
use crate::auth::{Identity, Permission};
use crate::db::{NewUser, UserProfile, UserUpdate};
use crate::server::AppState;
use crate::types::{AccoladeError, Result};

const PREFIX: &str = "/api/v1/users";

#[derive(Debug, Deserialize)]
pub struct RoleChange {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordChange {
    pub password: String,
}

fn require_admin(req: &Request<Bytes>, state: &AppState) -> Result<Identity> {
    state
        .gate
        .authorize(auth_header(req).as_deref(), &[Permission::UserManage])
}

fn user_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| AccoladeError::NotFound(format!("user {id}")))
}

async fn handle_create(req: &Request<Bytes>, state: &AppState) -> Result<UserProfile> {
    let admin = require_admin(req, state)?;
    let body: NewUser = parse_json_body(req)?;
    let profile = state.accounts.create_user(body).await?;
    info!(admin = %admin.account_id, user = %profile.id, "User provisioned");
    Ok(profile)
}

async fn handle_list(req: &Request<Bytes>, state: &AppState) -> Result<Vec<UserProfile>> {
    require_admin(req, state)?;
    state.accounts.list_profiles().await
}

async fn handle_get(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<UserProfile> {
    require_admin(req, state)?;
    state.accounts.profile(user_id(id)?).await
}

async fn handle_update(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<UserProfile> {
    let admin = require_admin(req, state)?;
    let id = user_id(id)?;
    let body: UserUpdate = parse_json_body(req)?;
    if id == admin.account_id && body.is_active == Some(false) {
        return Err(AccoladeError::Validation("cannot deactivate your own account".into()));
    }
    state.accounts.update_user(id, body).await
}

async fn handle_delete(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<UserProfile> {
    let admin = require_admin(req, state)?;
    let id = user_id(id)?;
    if id == admin.account_id {
        return Err(AccoladeError::Validation("cannot delete your own account".into()));
    }
    let removed = state.accounts.delete_user(id).await?;
    info!(admin = %admin.account_id, user = %id, "User removed");
    Ok(removed)
}

async fn handle_role(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<UserProfile> {
    let admin = require_admin(req, state)?;
    let id = user_id(id)?;
    let body: RoleChange = parse_json_body(req)?;
    if id == admin.account_id {
        return Err(AccoladeError::Validation("cannot change your own role".into()));
    }
    state.accounts.set_role(id, &body.role).await
}

async fn handle_password(req: &Request<Bytes>, state: &AppState, id: &str) -> Result<UserProfile> {
    require_admin(req, state)?;
    let id = user_id(id)?;
    let body: PasswordChange = parse_json_body(req)?;
    state.accounts.set_password(id, &body.password).await?;
    state.accounts.profile(id).await
}

pub async fn handle_user_request(
    req: Request<Bytes>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    let segments = path_segments(&path, PREFIX)?;
    let method = req.method().clone();

    let response = match (&method, segments.as_slice()) {
        (&Method::OPTIONS, _) => cors_preflight(),
        (&Method::POST, []) => respond(StatusCode::CREATED, handle_create(&req, &state).await),
        (&Method::GET, []) => respond(StatusCode::OK, handle_list(&req, &state).await),
        (&Method::GET, [id]) => respond(StatusCode::OK, handle_get(&req, &state, id).await),
        (&Method::PUT, [id]) => respond(StatusCode::OK, handle_update(&req, &state, id).await),
        (&Method::DELETE, [id]) => respond(StatusCode::OK, handle_delete(&req, &state, id).await),
        (&Method::PUT, [id, "role"]) => respond(StatusCode::OK, handle_role(&req, &state, id).await),
        (&Method::PUT, [id, "password"]) => {
            respond(StatusCode::OK, handle_password(&req, &state, id).await)
        }
        (_, []) | (_, [_]) | (_, [_, "role" | "password"]) => method_not_allowed(),
        _ => not_found(&path),
    };
    Some(response)
}

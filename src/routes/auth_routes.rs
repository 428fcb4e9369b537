//! HTTP Routes for Authentication
//!
//! - POST /api/v1/auth/login   - email + password -> token
//! - POST /api/v1/auth/logout  - revoke the presented token
//! - POST /api/v1/auth/refresh - new token for a live session, old one revoked
//! - GET  /api/v1/auth/profile - account behind the token

use bytes::Bytes;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    auth_header, cors_preflight, method_not_allowed, not_found, parse_json_body, respond, BoxBody,
};
use crate::auth::{verify_password, Claims, Permission, TokenInput};
use crate::db::UserProfile;
use crate::server::AppState;
use crate::types::{AccoladeError, Result};

const PREFIX: &str = "/api/v1/auth";

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub role_id: Uuid,
    pub role: String,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: u64,
    pub user: SessionUser,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn bad_credentials() -> AccoladeError {
    AccoladeError::Unauthenticated("invalid email or password".into())
}

fn session(token: String, claims: &Claims, username: String, full_name: String) -> AuthResponse {
    AuthResponse {
        token,
        expires_at: claims.exp,
        user: SessionUser {
            id: claims.sub,
            username,
            full_name,
            role_id: claims.role_id,
            role: claims.role.clone(),
            permissions: claims.permissions.clone(),
        },
    }
}

// =============================================================================
// Route Handlers
// =============================================================================

/// POST /api/v1/auth/login
///
/// Unknown email and wrong password give the same 401; an inactive account
/// gives 403.
async fn handle_login(req: &Request<Bytes>, state: &AppState) -> Result<AuthResponse> {
    let body: LoginRequest = parse_json_body(req)?;
    let account = state
        .accounts
        .find_by_email(&body.email)
        .await?
        .ok_or_else(bad_credentials)?;

    if !account.is_active {
        warn!(account = %account.id, "Login attempt on inactive account");
        return Err(AccoladeError::Forbidden("account is inactive".into()));
    }
    if !verify_password(&body.password, &account.password_hash)? {
        warn!(account = %account.id, "Login failed: wrong password");
        return Err(bad_credentials());
    }

    let permissions = state.accounts.permissions_for_role(account.role_id).await?;
    let (token, claims) = state.gate.jwt().generate_token(TokenInput {
        account_id: account.id,
        email: account.email.clone(),
        role_id: account.role_id,
        role: account.role.clone(),
        permissions,
    })?;

    info!(account = %account.id, role = %account.role, "User logged in");
    Ok(session(token, &claims, account.username, account.full_name))
}

/// POST /api/v1/auth/logout
async fn handle_logout(req: &Request<Bytes>, state: &AppState) -> Result<MessageResponse> {
    let identity = state.gate.authenticate(auth_header(req).as_deref())?;
    state
        .gate
        .revocations()
        .revoke(&identity.token, identity.claims.exp);
    info!(account = %identity.account_id, "User logged out");
    Ok(MessageResponse {
        message: "Logged out successfully".into(),
    })
}

/// POST /api/v1/auth/refresh
///
/// Re-reads the account so a deactivated user or changed role grants take
/// effect on refresh.
async fn handle_refresh(req: &Request<Bytes>, state: &AppState) -> Result<AuthResponse> {
    let identity = state.gate.authenticate(auth_header(req).as_deref())?;
    let profile = state.accounts.profile(identity.account_id).await?;
    if !profile.is_active {
        return Err(AccoladeError::Forbidden("account is inactive".into()));
    }

    let mut input = TokenInput::from(&identity.claims);
    input.role_id = profile.role_id;
    input.role = profile.role.clone();
    input.permissions = profile.permissions.clone();
    let (token, claims) = state.gate.jwt().generate_token(input)?;

    state
        .gate
        .revocations()
        .revoke(&identity.token, identity.claims.exp);
    info!(account = %identity.account_id, "Token refreshed");
    Ok(session(token, &claims, profile.username, profile.full_name))
}

/// GET /api/v1/auth/profile
async fn handle_profile(req: &Request<Bytes>, state: &AppState) -> Result<UserProfile> {
    let identity = state.gate.authenticate(auth_header(req).as_deref())?;
    state.accounts.profile(identity.account_id).await
}

// =============================================================================
// Main Router
// =============================================================================

/// Handle auth-related HTTP requests.
///
/// Returns Some(response) if request was handled, None if not an auth route.
pub async fn handle_auth_request(
    req: Request<Bytes>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path().to_string();
    let rest = path.strip_prefix(PREFIX)?;
    if !(rest.is_empty() || rest.starts_with('/')) {
        return None;
    }

    let method = req.method().clone();
    if method == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let response = match (&method, rest) {
        (&Method::POST, "/login") => respond(StatusCode::OK, handle_login(&req, &state).await),
        (&Method::POST, "/logout") => respond(StatusCode::OK, handle_logout(&req, &state).await),
        (&Method::POST, "/refresh") => respond(StatusCode::OK, handle_refresh(&req, &state).await),
        (&Method::GET, "/profile") => respond(StatusCode::OK, handle_profile(&req, &state).await),

        (_, "/login") | (_, "/logout") | (_, "/refresh") | (_, "/profile") => method_not_allowed(),

        _ => not_found(&path),
    };
    Some(response)
}

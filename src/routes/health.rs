//! Health check endpoints
//!
//! - /health  - liveness, plus which backends this instance is running on
//! - /version - build information from `build.rs`

use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use super::{json_response, BoxBody};
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    /// "online", or "degraded" when running on in-memory fallback stores
    pub status: &'static str,
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    /// "mongodb" or "memory"
    pub document_store: &'static str,
    pub timestamp: String,
    /// "development" or "production"
    pub mode: &'static str,
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let degraded = state.document_backend != "mongodb";
    HealthResponse {
        healthy: true,
        status: if degraded { "degraded" } else { "online" },
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        document_store: state.document_backend,
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
    }
}

/// Handle liveness check (/health)
///
/// Always 200 while the process is serving; `status` tells callers whether
/// the persistent stores are in use.
pub fn health_check(state: Arc<AppState>) -> Response<BoxBody> {
    json_response(StatusCode::OK, &build_health_response(&state))
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    /// Cargo package version
    pub version: &'static str,
    /// Git commit hash (short)
    pub commit: &'static str,
    /// Git commit hash (full)
    pub commit_full: &'static str,
    /// Build timestamp
    pub build_time: &'static str,
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &VersionResponse {
            version: env!("CARGO_PKG_VERSION"),
            commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
            commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
            build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
            service: "accolade",
        },
    )
}

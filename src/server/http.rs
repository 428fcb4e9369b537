//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo. Each connection is served on its own task;
//! request bodies are buffered once, bounded by the larger of the JSON limit
//! and the attachment limit, before routing.

use bytes::Bytes;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::achievement::{AttachmentStorage, LifecycleCoordinator, Reconciler};
use crate::auth::{AuthorizationGate, RevocationList};
use crate::config::Args;
use crate::db::AccountStore;
use crate::reports::ReportService;
use crate::routes::{self, BoxBody, MAX_JSON_BODY};
use crate::store::{AchievementStore, ReferenceStore, StudentDirectory};
use crate::types::Result;

/// Store implementations the service runs on
pub struct Backends {
    pub documents: Arc<dyn AchievementStore>,
    pub references: Arc<dyn ReferenceStore>,
    pub students: Arc<dyn StudentDirectory>,
    pub accounts: AccountStore,
    /// "mongodb" or "memory"
    pub document_backend: &'static str,
}

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub gate: AuthorizationGate,
    pub coordinator: LifecycleCoordinator,
    pub reconciler: Arc<Reconciler>,
    pub accounts: AccountStore,
    pub reports: ReportService,
    pub document_backend: &'static str,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, backends: Backends, revocations: Arc<dyn RevocationList>) -> Result<Self> {
        let jwt = args.jwt_validator()?;
        let timeout = args.store_timeout();
        let attachments = Arc::new(AttachmentStorage::new(
            args.upload_dir.clone(),
            args.max_upload_bytes,
        ));

        let coordinator = LifecycleCoordinator::new(
            Arc::clone(&backends.documents),
            Arc::clone(&backends.references),
            Arc::clone(&backends.students),
            attachments,
            timeout,
        );
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&backends.documents),
            Arc::clone(&backends.references),
            timeout,
        ));
        let reports = ReportService::new(backends.documents, backends.students, timeout);

        Ok(Self {
            args,
            gate: AuthorizationGate::new(jwt, revocations),
            coordinator,
            reconciler,
            accounts: backends.accounts,
            reports,
            document_backend: backends.document_backend,
            started_at: Instant::now(),
        })
    }

    /// Largest body the router will buffer: an upload plus room for its
    /// multipart framing
    pub fn body_limit(&self) -> usize {
        self.args.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD).max(MAX_JSON_BODY)
    }
}

/// Headers and boundaries around one multipart file part
const MULTIPART_OVERHEAD: usize = 16 * 1024;

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!("Accolade listening on {}", state.args.listen);

    if state.args.dev_mode {
        warn!("Development mode enabled");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    info!("[{}] {} {}", addr, method, path);

    let response = match routes::collect_request(req, state.body_limit()).await {
        Ok(req) => route(state, req).await,
        Err(e) => routes::error_response(&e),
    };

    info!(
        "[{}] {} {} -> {} ({}ms)",
        addr,
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    Ok(response)
}

/// Dispatch a buffered request to its route group
pub async fn route(state: Arc<AppState>, req: Request<Bytes>) -> Response<BoxBody> {
    let path = req.uri().path().to_string();

    match (req.method(), path.as_str()) {
        (&Method::GET, "/health") => return routes::health_check(state),
        (&Method::GET, "/version") => return routes::version_info(),
        _ => {}
    }

    let handled = if path.starts_with("/api/v1/auth") {
        routes::handle_auth_request(req, state).await
    } else if path.starts_with("/api/v1/achievements") || path.starts_with("/api/v1/admin") {
        routes::handle_achievement_request(req, state).await
    } else if path.starts_with("/api/v1/users") {
        routes::handle_user_request(req, state).await
    } else if path.starts_with("/api/v1/students") {
        routes::handle_student_request(req, state).await
    } else if path.starts_with("/api/v1/lecturers") {
        routes::handle_lecturer_request(req, state).await
    } else if path.starts_with("/api/v1/reports") {
        routes::handle_report_request(req, state).await
    } else {
        None
    };

    handled.unwrap_or_else(|| routes::not_found(&path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryRevocationList;
    use crate::db::{RelationalDb, SqliteReferenceStore, SqliteStudentDirectory};
    use crate::store::MemoryAchievementStore;
    use clap::Parser;
    use http_body_util::BodyExt;
    use hyper::StatusCode;
    use serde_json::{json, Value};

    const ADMIN_EMAIL: &str = "admin@campus.ac.id";
    const ADMIN_PASSWORD: &str = "admin-password";

    struct TestApp {
        state: Arc<AppState>,
        _uploads: tempfile::TempDir,
    }

    async fn app() -> TestApp {
        let uploads = tempfile::tempdir().unwrap();
        let args = Args::parse_from([
            "accolade",
            "--dev-mode",
            "--upload-dir",
            uploads.path().to_str().unwrap(),
        ]);
        let db = RelationalDb::open_in_memory().unwrap();
        let accounts = AccountStore::new(db.clone());
        accounts.ensure_admin(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();

        let backends = Backends {
            documents: Arc::new(MemoryAchievementStore::new()),
            references: Arc::new(SqliteReferenceStore::new(db.clone())),
            students: Arc::new(SqliteStudentDirectory::new(db)),
            accounts,
            document_backend: "memory",
        };
        let state = AppState::new(args, backends, Arc::new(MemoryRevocationList::new())).unwrap();
        TestApp {
            state: Arc::new(state),
            _uploads: uploads,
        }
    }

    impl TestApp {
        async fn call(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: impl Into<Bytes>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("Authorization", format!("Bearer {token}"));
            }
            let response = route(Arc::clone(&self.state), builder.body(body.into()).unwrap()).await;
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }

        /// POST one multipart `file` part to an achievement's attachments
        async fn upload(&self, id: &str, token: &str, file_name: &str, bytes: &[u8]) -> (StatusCode, Value) {
            let boundary = "accolade-test-boundary";
            let mut body = format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .into_bytes();
            body.extend_from_slice(bytes);
            body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

            let request = Request::builder()
                .method(Method::POST)
                .uri(format!("/api/v1/achievements/{id}/attachments"))
                .header("Authorization", format!("Bearer {token}"))
                .header("Content-Type", format!("multipart/form-data; boundary={boundary}"))
                .body(Bytes::from(body))
                .unwrap();
            let response = route(Arc::clone(&self.state), request).await;
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            (status, serde_json::from_slice(&bytes).unwrap())
        }

        async fn json(&self, method: Method, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
            self.call(method, uri, token, body.to_string()).await
        }

        async fn login(&self, email: &str, password: &str) -> String {
            let (status, body) = self
                .json(
                    Method::POST,
                    "/api/v1/auth/login",
                    None,
                    json!({ "email": email, "password": password }),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
            body["data"]["token"].as_str().unwrap().to_string()
        }

        /// Admin-provisioned student and advisor, logged in
        async fn student_and_advisor(&self) -> (String, String) {
            let admin = self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
            let (status, _) = self
                .json(
                    Method::POST,
                    "/api/v1/users",
                    Some(&admin),
                    json!({
                        "username": "siti",
                        "email": "siti@student.campus.ac.id",
                        "password": "student-pass",
                        "fullName": "Siti Rahma",
                        "role": "Mahasiswa",
                        "student": {
                            "studentId": "20221030001",
                            "programStudy": "Informatics",
                            "academicYear": "2022"
                        }
                    }),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);

            let (status, _) = self
                .json(
                    Method::POST,
                    "/api/v1/users",
                    Some(&admin),
                    json!({
                        "username": "budi",
                        "email": "budi@campus.ac.id",
                        "password": "advisor-pass",
                        "fullName": "Budi Santoso",
                        "role": "Dosen Wali",
                        "lecturer": { "lecturerId": "L-001", "department": "Informatics" }
                    }),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);

            (
                self.login("siti@student.campus.ac.id", "student-pass").await,
                self.login("budi@campus.ac.id", "advisor-pass").await,
            )
        }
    }

    #[tokio::test]
    async fn test_health_and_unknown_route() {
        let app = app().await;
        let (status, body) = app.call(Method::GET, "/health", None, Bytes::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["documentStore"], "memory");

        let (status, body) = app.call(Method::GET, "/nope", None, Bytes::new()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_login_failures() {
        let app = app().await;
        let (status, body) = app
            .json(
                Method::POST,
                "/api/v1/auth/login",
                None,
                json!({ "email": ADMIN_EMAIL, "password": "wrong-password" }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHENTICATED");

        let (status, _) = app
            .call(Method::GET, "/api/v1/achievements", None, Bytes::new())
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_submit_verify_flow() {
        let app = app().await;
        let (student, advisor) = app.student_and_advisor().await;

        let (status, body) = app
            .json(
                Method::POST,
                "/api/v1/achievements",
                Some(&student),
                json!({
                    "achievementType": "competition",
                    "title": "National programming contest",
                    "details": { "level": "national" }
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["data"]["achievement"]["status"], "draft");
        assert_eq!(body["data"]["reference"]["status"], "draft");
        let id = body["data"]["achievement"]["id"].as_str().unwrap().to_string();

        // Students cannot verify
        let (status, _) = app
            .call(Method::POST, &format!("/api/v1/achievements/{id}/verify"), Some(&student), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Advisors cannot verify a draft
        let (status, body) = app
            .call(Method::POST, &format!("/api/v1/achievements/{id}/verify"), Some(&advisor), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "INVALID_STATE");

        let (status, _) = app
            .call(Method::POST, &format!("/api/v1/achievements/{id}/submit"), Some(&student), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .call(Method::GET, "/api/v1/achievements?status=submitted", Some(&advisor), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, body) = app
            .call(Method::POST, &format!("/api/v1/achievements/{id}/verify"), Some(&advisor), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["achievement"]["status"], "verified");
        assert_eq!(body["data"]["reference"]["status"], "verified");

        let (status, body) = app
            .call(Method::GET, &format!("/api/v1/achievements/{id}/history"), Some(&student), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "verified");
        assert!(body["data"]["verifiedBy"].is_string());

        let (status, body) = app
            .call(Method::GET, "/api/v1/reports/statistics", Some(&advisor), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["verifiedCount"], 1);
        assert_eq!(body["data"]["totalStudents"], 1);

        let (status, body) = app
            .call(Method::GET, "/api/v1/reports/student/20221030001", Some(&student), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Siti Rahma");
    }

    #[tokio::test]
    async fn test_upload_rejects_unlisted_extension() {
        let app = app().await;
        let (student, _) = app.student_and_advisor().await;
        let (_, body) = app
            .json(
                Method::POST,
                "/api/v1/achievements",
                Some(&student),
                json!({ "achievementType": "certification", "title": "Cloud cert" }),
            )
            .await;
        let id = body["data"]["achievement"]["id"].as_str().unwrap().to_string();

        let (status, body) = app.upload(&id, &student, "setup.exe", b"MZ").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let (status, body) = app.upload(&id, &student, "certificate.PDF", b"%PDF-1.4").await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let attachments = body["data"]["attachments"].as_array().unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0]["fileName"], "certificate.PDF");
    }

    #[tokio::test]
    async fn test_upload_requires_multipart_file_part() {
        let app = app().await;
        let (student, _) = app.student_and_advisor().await;
        let (_, body) = app
            .json(
                Method::POST,
                "/api/v1/achievements",
                Some(&student),
                json!({ "achievementType": "certification", "title": "Cloud cert" }),
            )
            .await;
        let id = body["data"]["achievement"]["id"].as_str().unwrap().to_string();

        // Raw body without multipart framing
        let (status, body) = app
            .call(
                Method::POST,
                &format!("/api/v1/achievements/{id}/attachments"),
                Some(&student),
                Bytes::from_static(b"%PDF-1.4"),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let (status, body) = app
            .call(Method::GET, &format!("/api/v1/achievements/{id}"), Some(&student), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["attachments"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_logout_and_refresh_revoke_tokens() {
        let app = app().await;
        let token = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;

        let (status, body) = app
            .call(Method::POST, "/api/v1/auth/refresh", Some(&token), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::OK);
        let refreshed = body["data"]["token"].as_str().unwrap().to_string();
        assert_ne!(refreshed, token);

        let (status, _) = app
            .call(Method::GET, "/api/v1/auth/profile", Some(&token), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app
            .call(Method::GET, "/api/v1/auth/profile", Some(&refreshed), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["email"], ADMIN_EMAIL);

        let (status, _) = app
            .call(Method::POST, "/api/v1/auth/logout", Some(&refreshed), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app
            .call(Method::GET, "/api/v1/admin/inconsistencies", Some(&refreshed), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_consistency_endpoints() {
        let app = app().await;
        let (student, _) = app.student_and_advisor().await;
        let admin = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;

        let (_, body) = app
            .json(
                Method::POST,
                "/api/v1/achievements",
                Some(&student),
                json!({ "achievementType": "organization", "title": "Student council" }),
            )
            .await;
        let id = body["data"]["achievement"]["id"].as_str().unwrap().to_string();

        let (status, body) = app
            .call(Method::GET, &format!("/api/v1/achievements/{id}/consistency"), Some(&admin), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["consistent"], true);

        let (status, body) = app
            .call(Method::GET, "/api/v1/admin/inconsistencies", Some(&admin), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["count"], 0);

        let (status, _) = app
            .call(Method::GET, "/api/v1/admin/inconsistencies", Some(&student), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_user_administration_and_advisor_assignment() {
        let app = app().await;
        let (student, advisor) = app.student_and_advisor().await;
        let admin = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;

        let (status, body) = app.call(Method::GET, "/api/v1/students", Some(&admin), Bytes::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["fullName"], "Siti Rahma");
        let student_id = body["data"][0]["id"].as_str().unwrap().to_string();

        let (status, body) = app.call(Method::GET, "/api/v1/lecturers", Some(&admin), Bytes::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["lecturerId"], "L-001");
        let lecturer_id = body["data"][0]["id"].as_str().unwrap().to_string();

        let (status, body) = app
            .json(
                Method::PUT,
                &format!("/api/v1/students/{student_id}/advisor"),
                Some(&admin),
                json!({ "advisorId": lecturer_id }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["advisorId"], lecturer_id.as_str());

        // The lecturer sees their own advisees; the student sees nothing
        let advisees = format!("/api/v1/lecturers/{lecturer_id}/advisees");
        let (status, body) = app.call(Method::GET, &advisees, Some(&advisor), Bytes::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["studentId"], "20221030001");
        let (status, _) = app.call(Method::GET, &advisees, Some(&student), Bytes::new()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.call(Method::GET, "/api/v1/students", Some(&student), Bytes::new()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, body) = app.call(Method::GET, "/api/v1/users", Some(&admin), Bytes::new()).await;
        let user_id = |email: &str| {
            body["data"]
                .as_array()
                .unwrap()
                .iter()
                .find(|u| u["email"] == email)
                .unwrap()["id"]
                .as_str()
                .unwrap()
                .to_string()
        };
        let siti = user_id("siti@student.campus.ac.id");
        let budi = user_id("budi@campus.ac.id");
        let me = user_id(ADMIN_EMAIL);

        let (status, _) = app
            .json(
                Method::PUT,
                &format!("/api/v1/users/{siti}/role"),
                Some(&admin),
                json!({ "role": "Admin" }),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = app
            .json(
                Method::PUT,
                &format!("/api/v1/users/{siti}/password"),
                Some(&admin),
                json!({ "password": "fresh-student-pass" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        app.login("siti@student.campus.ac.id", "fresh-student-pass").await;

        let (status, body) = app
            .json(
                Method::PUT,
                &format!("/api/v1/users/{siti}"),
                Some(&admin),
                json!({ "isActive": false }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isActive"], false);
        let (status, _) = app
            .json(
                Method::POST,
                "/api/v1/auth/login",
                None,
                json!({ "email": "siti@student.campus.ac.id", "password": "fresh-student-pass" }),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .call(Method::DELETE, &format!("/api/v1/users/{budi}"), Some(&admin), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = app
            .call(Method::GET, &format!("/api/v1/students/{student_id}"), Some(&admin), Bytes::new())
            .await;
        assert!(body["data"]["advisorId"].is_null());

        let (status, _) = app
            .call(Method::DELETE, &format!("/api/v1/users/{me}"), Some(&admin), Bytes::new())
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

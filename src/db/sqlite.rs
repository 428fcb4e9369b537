//! SQLite database for accounts and achievement references
//!
//! ## Tables
//!
//! - `roles`, `permissions`, `role_permissions` - seeded grants
//! - `users` - login accounts
//! - `students`, `lecturers` - profiles linked to a user
//! - `achievement_references` - workflow status and audit stamps, one row per
//!   achievement document, keyed by `mongo_achievement_id`
//!
//! rusqlite is synchronous; async callers go through `run`, which moves the
//! closure onto the blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{roles, Permission};
use crate::types::{AccoladeError, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS roles (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS permissions (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    resource TEXT NOT NULL,
    action TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS role_permissions (
    role_id TEXT NOT NULL REFERENCES roles(id),
    permission_id TEXT NOT NULL REFERENCES permissions(id),
    PRIMARY KEY (role_id, permission_id)
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    full_name TEXT NOT NULL,
    role_id TEXT NOT NULL REFERENCES roles(id),
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lecturers (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL UNIQUE REFERENCES users(id),
    lecturer_id TEXT NOT NULL UNIQUE,
    department TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS students (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL UNIQUE REFERENCES users(id),
    student_id TEXT NOT NULL UNIQUE,
    program_study TEXT NOT NULL,
    academic_year TEXT NOT NULL,
    advisor_id TEXT REFERENCES lecturers(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS achievement_references (
    id TEXT PRIMARY KEY,
    student_id TEXT NOT NULL REFERENCES students(id),
    mongo_achievement_id TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL CHECK (status IN ('draft', 'submitted', 'verified', 'rejected', 'deleted')),
    submitted_at TEXT,
    verified_at TEXT,
    verified_by TEXT,
    rejection_note TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_references_student ON achievement_references(student_id);
CREATE INDEX IF NOT EXISTS idx_references_status ON achievement_references(status);
"#;

fn lock_error<T>(e: std::sync::PoisonError<T>) -> AccoladeError {
    AccoladeError::Internal(format!("SQLite lock poisoned: {e}"))
}

/// Shared SQLite connection
#[derive(Clone)]
pub struct RelationalDb {
    conn: Arc<Mutex<Connection>>,
}

impl RelationalDb {
    /// Open or create the database file and apply the schema
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening SQLite database at {:?}", path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn)
    }

    /// Open an in-memory database (for tests)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        init_schema(&conn)?;
        seed_roles(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(lock_error)?;
        f(&conn)
    }

    /// Exclusive access, for transactions
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(lock_error)?;
        f(&mut conn)
    }

    /// Run `f` on the blocking pool
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn_mut(f))
            .await
            .map_err(|e| AccoladeError::Internal(format!("SQLite task failed: {e}")))?
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;
    let current: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;

    match current {
        None => {
            info!("Creating relational schema v{}", SCHEMA_VERSION);
            conn.execute_batch(SCHEMA)?;
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [SCHEMA_VERSION])?;
        }
        Some(v) if v < SCHEMA_VERSION => {
            info!("Migrating relational schema from v{} to v{}", v, SCHEMA_VERSION);
            conn.execute_batch(SCHEMA)?;
            conn.execute("UPDATE schema_version SET version = ?1", [SCHEMA_VERSION])?;
        }
        Some(v) => debug!("Relational schema is up to date (v{})", v),
    }
    Ok(())
}

/// Insert the fixed roles, permissions and grants if missing
fn seed_roles(conn: &Connection) -> Result<()> {
    let now = chrono::Utc::now();

    for permission in Permission::ALL {
        conn.execute(
            "INSERT OR IGNORE INTO permissions (id, name, resource, action, description)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                permission.to_string(),
                permission.resource(),
                permission.action(),
                permission.description(),
            ],
        )?;
    }

    for role in [roles::ADMIN, roles::STUDENT, roles::ADVISOR] {
        conn.execute(
            "INSERT OR IGNORE INTO roles (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![Uuid::new_v4().to_string(), role, now],
        )?;
        for permission in roles::grants(role) {
            conn.execute(
                "INSERT OR IGNORE INTO role_permissions (role_id, permission_id)
                 SELECT r.id, p.id FROM roles r, permissions p
                 WHERE r.name = ?1 AND p.name = ?2",
                params![role, permission.to_string()],
            )?;
        }
    }
    Ok(())
}

/// Parse a UUID column
pub(crate) fn uuid_column(value: String, column: &str) -> Result<Uuid> {
    Uuid::parse_str(&value)
        .map_err(|e| AccoladeError::Internal(format!("bad uuid in {column}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_grants() {
        let db = RelationalDb::open_in_memory().unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM role_permissions rp JOIN roles r ON r.id = rp.role_id
                     WHERE r.name = ?1",
                    [roles::ADVISOR],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accolade.db");
        RelationalDb::open(&path).unwrap();
        let db = RelationalDb::open(&path).unwrap();

        let roles: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM roles", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(roles, 3);
    }

    #[tokio::test]
    async fn test_run_on_blocking_pool() {
        let db = RelationalDb::open_in_memory().unwrap();
        let permissions: i64 = db
            .run(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM permissions", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(permissions, Permission::ALL.len() as i64);
    }
}

//! Accounts, roles and profiles (SQLite)
//!
//! Backs login, token permissions, user administration, student and
//! lecturer directories (advisor assignment) and the account -> student
//! profile lookup the lifecycle coordinator needs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::achievement::Student;
use crate::auth::{hash_password, roles, Permission};
use crate::db::sqlite::{uuid_column, RelationalDb};
use crate::store::StudentDirectory;
use crate::types::{AccoladeError, Result};

const SELECT_USER: &str = "SELECT u.id, u.username, u.email, u.password_hash, u.full_name,
        u.role_id, r.name AS role_name, u.is_active, u.created_at
     FROM users u JOIN roles r ON r.id = u.role_id";

const SELECT_STUDENT: &str =
    "SELECT id, user_id, student_id, program_study, academic_year, advisor_id FROM students";

const SELECT_STUDENT_SUMMARY: &str = "SELECT s.id, s.user_id, s.student_id, s.program_study,
        s.academic_year, s.advisor_id, u.full_name
     FROM students s JOIN users u ON u.id = s.user_id";

const SELECT_LECTURER_SUMMARY: &str =
    "SELECT l.id, l.user_id, l.lecturer_id, l.department, u.full_name
     FROM lecturers l JOIN users u ON u.id = l.user_id";

/// Login account as stored
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role_id: Uuid,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

struct AccountRow {
    id: String,
    username: String,
    email: String,
    password_hash: String,
    full_name: String,
    role_id: String,
    role: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl AccountRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            email: row.get("email")?,
            password_hash: row.get("password_hash")?,
            full_name: row.get("full_name")?,
            role_id: row.get("role_id")?,
            role: row.get("role_name")?,
            is_active: row.get("is_active")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_record(self) -> Result<AccountRecord> {
        Ok(AccountRecord {
            id: uuid_column(self.id, "users.id")?,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            full_name: self.full_name,
            role_id: uuid_column(self.role_id, "users.role_id")?,
            role: self.role,
            is_active: self.is_active,
            created_at: self.created_at,
        })
    }
}

struct StudentRow {
    id: String,
    user_id: String,
    student_id: String,
    program_study: String,
    academic_year: String,
    advisor_id: Option<String>,
}

impl StudentRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            student_id: row.get("student_id")?,
            program_study: row.get("program_study")?,
            academic_year: row.get("academic_year")?,
            advisor_id: row.get("advisor_id")?,
        })
    }

    fn into_student(self) -> Result<Student> {
        Ok(Student {
            id: uuid_column(self.id, "students.id")?,
            user_id: uuid_column(self.user_id, "students.user_id")?,
            student_id: self.student_id,
            program_study: self.program_study,
            academic_year: self.academic_year,
            advisor_id: self
                .advisor_id
                .map(|a| uuid_column(a, "students.advisor_id"))
                .transpose()?,
        })
    }
}

/// Lecturer (academic advisor) profile
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Lecturer {
    pub id: Uuid,
    pub user_id: Uuid,
    pub lecturer_id: String,
    pub department: String,
}

/// Student profile with the account's display name
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    #[serde(flatten)]
    pub student: Student,
    pub full_name: String,
}

impl StudentSummary {
    fn from_row(row: &Row) -> rusqlite::Result<(StudentRow, String)> {
        Ok((StudentRow::from_row(row)?, row.get("full_name")?))
    }

    fn build((row, full_name): (StudentRow, String)) -> Result<Self> {
        Ok(Self {
            student: row.into_student()?,
            full_name,
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LecturerSummary {
    #[serde(flatten)]
    pub lecturer: Lecturer,
    pub full_name: String,
}

impl LecturerSummary {
    fn from_row(row: &Row) -> rusqlite::Result<[String; 5]> {
        Ok([
            row.get("id")?,
            row.get("user_id")?,
            row.get("lecturer_id")?,
            row.get("department")?,
            row.get("full_name")?,
        ])
    }

    fn build([id, user_id, lecturer_id, department, full_name]: [String; 5]) -> Result<Self> {
        Ok(Self {
            lecturer: Lecturer {
                id: uuid_column(id, "lecturers.id")?,
                user_id: uuid_column(user_id, "lecturers.user_id")?,
                lecturer_id,
                department,
            },
            full_name,
        })
    }
}

/// Public view of an account
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub role_id: Uuid,
    pub role: String,
    pub is_active: bool,
    pub permissions: Vec<Permission>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student: Option<Student>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lecturer: Option<Lecturer>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudentProfile {
    pub student_id: String,
    pub program_study: String,
    pub academic_year: String,
    #[serde(default)]
    pub advisor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLecturerProfile {
    pub lecturer_id: String,
    pub department: String,
}

/// Request body for user provisioning
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    /// Role name, e.g. "Mahasiswa"
    pub role: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub student: Option<NewStudentProfile>,
    #[serde(default)]
    pub lecturer: Option<NewLecturerProfile>,
}

fn default_true() -> bool {
    true
}

impl NewUser {
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(AccoladeError::Validation("username is required".into()));
        }
        if !self.email.contains('@') {
            return Err(AccoladeError::Validation("email is invalid".into()));
        }
        if self.full_name.trim().is_empty() {
            return Err(AccoladeError::Validation("fullName is required".into()));
        }
        if self.student.is_some() && self.lecturer.is_some() {
            return Err(AccoladeError::Validation(
                "a user has either a student or a lecturer profile, not both".into(),
            ));
        }
        if self.student.is_some() && self.role != roles::STUDENT {
            return Err(AccoladeError::Validation(format!(
                "student profile requires role '{}'",
                roles::STUDENT
            )));
        }
        if self.lecturer.is_some() && self.role != roles::ADVISOR {
            return Err(AccoladeError::Validation(format!(
                "lecturer profile requires role '{}'",
                roles::ADVISOR
            )));
        }
        if let Some(s) = &self.student {
            if s.student_id.trim().is_empty() {
                return Err(AccoladeError::Validation("studentId is required".into()));
            }
        }
        if let Some(l) = &self.lecturer {
            if l.lecturer_id.trim().is_empty() {
                return Err(AccoladeError::Validation("lecturerId is required".into()));
            }
        }
        Ok(())
    }
}

/// Partial account edit; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl UserUpdate {
    pub fn validate(&self) -> Result<()> {
        if self.username.as_deref().is_some_and(|u| u.trim().is_empty()) {
            return Err(AccoladeError::Validation("username cannot be empty".into()));
        }
        if self.email.as_deref().is_some_and(|e| !e.contains('@')) {
            return Err(AccoladeError::Validation("email is invalid".into()));
        }
        if self.full_name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AccoladeError::Validation("fullName cannot be empty".into()));
        }
        Ok(())
    }
}

fn load_permissions(conn: &Connection, role_id: &str) -> Result<Vec<Permission>> {
    let mut stmt = conn.prepare(
        "SELECT p.resource, p.action FROM permissions p
         JOIN role_permissions rp ON rp.permission_id = p.id
         WHERE rp.role_id = ?1
         ORDER BY p.resource, p.action",
    )?;
    let pairs = stmt
        .query_map([role_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut permissions = Vec::with_capacity(pairs.len());
    for (resource, action) in pairs {
        match Permission::from_parts(&resource, &action) {
            Some(p) => permissions.push(p),
            None => warn!("Ignoring unknown permission {}:{}", resource, action),
        }
    }
    Ok(permissions)
}

fn load_profile(conn: &Connection, user_id: &str) -> Result<Option<UserProfile>> {
    let sql = format!("{SELECT_USER} WHERE u.id = ?1");
    let Some(row) = conn
        .query_row(&sql, [user_id], AccountRow::from_row)
        .optional()?
    else {
        return Ok(None);
    };
    let role_id = row.role_id.clone();
    let account = row.into_record()?;

    let student = conn
        .query_row(
            &format!("{SELECT_STUDENT} WHERE user_id = ?1"),
            [user_id],
            StudentRow::from_row,
        )
        .optional()?
        .map(StudentRow::into_student)
        .transpose()?;

    let lecturer = conn
        .query_row(
            "SELECT id, lecturer_id, department FROM lecturers WHERE user_id = ?1",
            [user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?
        .map(|(id, lecturer_id, department)| -> Result<Lecturer> {
            Ok(Lecturer {
                id: uuid_column(id, "lecturers.id")?,
                user_id: account.id,
                lecturer_id,
                department,
            })
        })
        .transpose()?;

    Ok(Some(UserProfile {
        id: account.id,
        username: account.username,
        email: account.email,
        full_name: account.full_name,
        role_id: account.role_id,
        role: account.role,
        is_active: account.is_active,
        permissions: load_permissions(conn, &role_id)?,
        student,
        lecturer,
        created_at: account.created_at,
    }))
}

/// Account queries and provisioning
#[derive(Clone)]
pub struct AccountStore {
    db: RelationalDb,
}

impl AccountStore {
    pub fn new(db: RelationalDb) -> Self {
        Self { db }
    }

    /// Look up a login by email
    pub async fn find_by_email(&self, email: &str) -> Result<Option<AccountRecord>> {
        let email = email.trim().to_lowercase();
        let row = self
            .db
            .run(move |conn| {
                let sql = format!("{SELECT_USER} WHERE lower(u.email) = ?1");
                Ok(conn.query_row(&sql, [email], AccountRow::from_row).optional()?)
            })
            .await?;
        row.map(AccountRow::into_record).transpose()
    }

    /// Permissions currently granted to a role
    pub async fn permissions_for_role(&self, role_id: Uuid) -> Result<Vec<Permission>> {
        self.db
            .run(move |conn| load_permissions(conn, &role_id.to_string()))
            .await
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<UserProfile> {
        self.db
            .run(move |conn| load_profile(conn, &user_id.to_string()))
            .await?
            .ok_or_else(|| AccoladeError::NotFound(format!("user {user_id}")))
    }

    pub async fn list_profiles(&self) -> Result<Vec<UserProfile>> {
        self.db
            .run(|conn| {
                let ids = conn
                    .prepare("SELECT id FROM users ORDER BY created_at")?
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                let mut profiles = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(p) = load_profile(conn, &id)? {
                        profiles.push(p);
                    }
                }
                Ok(profiles)
            })
            .await
    }

    /// Create a user and its optional profile in one transaction
    pub async fn create_user(&self, new: NewUser) -> Result<UserProfile> {
        new.validate()?;
        let password_hash = hash_password(&new.password)?;
        let user_id = Uuid::new_v4();

        let profile = self
            .db
            .run(move |conn| {
                let tx = conn.transaction()?;
                let role_id: String = tx
                    .query_row("SELECT id FROM roles WHERE name = ?1", [&new.role], |row| {
                        row.get(0)
                    })
                    .optional()?
                    .ok_or_else(|| AccoladeError::Validation(format!("unknown role: {}", new.role)))?;

                let now = Utc::now();
                tx.execute(
                    "INSERT INTO users (id, username, email, password_hash, full_name, role_id,
                        is_active, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                    params![
                        user_id.to_string(),
                        new.username.trim(),
                        new.email.trim().to_lowercase(),
                        password_hash,
                        new.full_name.trim(),
                        role_id,
                        new.is_active,
                        now,
                    ],
                )?;

                if let Some(s) = &new.student {
                    tx.execute(
                        "INSERT INTO students (id, user_id, student_id, program_study,
                            academic_year, advisor_id, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            Uuid::new_v4().to_string(),
                            user_id.to_string(),
                            s.student_id.trim(),
                            s.program_study,
                            s.academic_year,
                            s.advisor_id.map(|a| a.to_string()),
                            now,
                        ],
                    )?;
                }
                if let Some(l) = &new.lecturer {
                    tx.execute(
                        "INSERT INTO lecturers (id, user_id, lecturer_id, department, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            Uuid::new_v4().to_string(),
                            user_id.to_string(),
                            l.lecturer_id.trim(),
                            l.department,
                            now,
                        ],
                    )?;
                }

                let profile = load_profile(&tx, &user_id.to_string())?.ok_or_else(|| {
                    AccoladeError::Internal("user vanished inside its own transaction".into())
                })?;
                tx.commit()?;
                Ok(profile)
            })
            .await?;

        info!(user_id = %profile.id, role = %profile.role, "User created");
        Ok(profile)
    }

    /// Create the admin account unless one with this email exists.
    /// Returns true when an account was created.
    pub async fn ensure_admin(&self, email: &str, password: &str) -> Result<bool> {
        if self.find_by_email(email).await?.is_some() {
            return Ok(false);
        }
        let username = email.split('@').next().unwrap_or("admin").to_string();
        self.create_user(NewUser {
            username,
            email: email.to_string(),
            password: password.to_string(),
            full_name: "Administrator".into(),
            role: roles::ADMIN.into(),
            is_active: true,
            student: None,
            lecturer: None,
        })
        .await?;
        Ok(true)
    }

    /// Edit account fields; `isActive = false` blocks login and refresh
    pub async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<UserProfile> {
        update.validate()?;
        let profile = self
            .db
            .run(move |conn| {
                let changed = conn.execute(
                    "UPDATE users SET
                        username = COALESCE(?2, username),
                        email = COALESCE(?3, email),
                        full_name = COALESCE(?4, full_name),
                        is_active = COALESCE(?5, is_active),
                        updated_at = ?6
                     WHERE id = ?1",
                    params![
                        id.to_string(),
                        update.username.as_deref().map(str::trim),
                        update.email.as_deref().map(|e| e.trim().to_lowercase()),
                        update.full_name.as_deref().map(str::trim),
                        update.is_active,
                        Utc::now(),
                    ],
                )?;
                if changed == 0 {
                    return Err(AccoladeError::NotFound(format!("user {id}")));
                }
                require_profile(conn, id)
            })
            .await?;
        info!(user_id = %id, is_active = profile.is_active, "User updated");
        Ok(profile)
    }

    pub async fn set_password(&self, id: Uuid, password: &str) -> Result<()> {
        let password_hash = hash_password(password)?;
        let changed = self
            .db
            .run(move |conn| {
                Ok(conn.execute(
                    "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id.to_string(), password_hash, Utc::now()],
                )?)
            })
            .await?;
        if changed == 0 {
            return Err(AccoladeError::NotFound(format!("user {id}")));
        }
        info!(user_id = %id, "Password changed");
        Ok(())
    }

    /// Move a user to another role. A student or lecturer profile pins the
    /// role it was created under.
    pub async fn set_role(&self, id: Uuid, role: &str) -> Result<UserProfile> {
        let role = role.trim().to_string();
        let profile = self
            .db
            .run(move |conn| {
                let tx = conn.transaction()?;
                let current = require_profile(&tx, id)?;
                let role_id: String = tx
                    .query_row("SELECT id FROM roles WHERE name = ?1", [&role], |row| row.get(0))
                    .optional()?
                    .ok_or_else(|| AccoladeError::Validation(format!("unknown role: {role}")))?;

                if current.student.is_some() && role != roles::STUDENT {
                    return Err(AccoladeError::InvalidState(format!(
                        "user {id} has a student profile and must keep role '{}'",
                        roles::STUDENT
                    )));
                }
                if current.lecturer.is_some() && role != roles::ADVISOR {
                    return Err(AccoladeError::InvalidState(format!(
                        "user {id} has a lecturer profile and must keep role '{}'",
                        roles::ADVISOR
                    )));
                }

                tx.execute(
                    "UPDATE users SET role_id = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id.to_string(), role_id, Utc::now()],
                )?;
                let profile = require_profile(&tx, id)?;
                tx.commit()?;
                Ok(profile)
            })
            .await?;
        info!(user_id = %id, role = %profile.role, "Role changed");
        Ok(profile)
    }

    /// Remove a user and its profile. Advisees of a removed lecturer lose
    /// their advisor; a student with achievement records cannot be removed.
    pub async fn delete_user(&self, id: Uuid) -> Result<UserProfile> {
        let profile = self
            .db
            .run(move |conn| {
                let tx = conn.transaction()?;
                let profile = require_profile(&tx, id)?;

                if let Some(student) = &profile.student {
                    let records: i64 = tx.query_row(
                        "SELECT COUNT(*) FROM achievement_references WHERE student_id = ?1",
                        [student.id.to_string()],
                        |row| row.get(0),
                    )?;
                    if records > 0 {
                        return Err(AccoladeError::InvalidState(format!(
                            "student {} has {records} achievement records; deactivate the account instead",
                            student.student_id
                        )));
                    }
                    tx.execute("DELETE FROM students WHERE id = ?1", [student.id.to_string()])?;
                }
                if let Some(lecturer) = &profile.lecturer {
                    tx.execute(
                        "UPDATE students SET advisor_id = NULL WHERE advisor_id = ?1",
                        [lecturer.id.to_string()],
                    )?;
                    tx.execute("DELETE FROM lecturers WHERE id = ?1", [lecturer.id.to_string()])?;
                }
                tx.execute("DELETE FROM users WHERE id = ?1", [id.to_string()])?;
                tx.commit()?;
                Ok(profile)
            })
            .await?;
        info!(user_id = %id, role = %profile.role, "User deleted");
        Ok(profile)
    }

    pub async fn list_students(&self) -> Result<Vec<StudentSummary>> {
        self.db
            .run(|conn| query_student_summaries(conn, "", &[]))
            .await
    }

    pub async fn student(&self, id: Uuid) -> Result<StudentSummary> {
        self.db.run(move |conn| load_student_summary(conn, id)).await
    }

    /// Assign (or with `None`, clear) a student's academic advisor
    pub async fn set_advisor(&self, student_id: Uuid, advisor_id: Option<Uuid>) -> Result<StudentSummary> {
        let summary = self
            .db
            .run(move |conn| {
                if let Some(advisor) = advisor_id {
                    if !lecturer_exists(conn, advisor)? {
                        return Err(AccoladeError::Validation(format!("unknown lecturer {advisor}")));
                    }
                }
                let changed = conn.execute(
                    "UPDATE students SET advisor_id = ?2 WHERE id = ?1",
                    params![student_id.to_string(), advisor_id.map(|a| a.to_string())],
                )?;
                if changed == 0 {
                    return Err(AccoladeError::NotFound(format!("student {student_id}")));
                }
                load_student_summary(conn, student_id)
            })
            .await?;
        info!(
            student = %summary.student.student_id,
            advisor = ?advisor_id,
            "Advisor assigned"
        );
        Ok(summary)
    }

    pub async fn list_lecturers(&self) -> Result<Vec<LecturerSummary>> {
        self.db
            .run(|conn| {
                let sql = format!("{SELECT_LECTURER_SUMMARY} ORDER BY l.lecturer_id");
                conn.prepare(&sql)?
                    .query_map([], LecturerSummary::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
                    .into_iter()
                    .map(LecturerSummary::build)
                    .collect()
            })
            .await
    }

    /// Students advised by one lecturer (lecturer profile id)
    pub async fn advisees(&self, lecturer_id: Uuid) -> Result<Vec<StudentSummary>> {
        self.db
            .run(move |conn| {
                if !lecturer_exists(conn, lecturer_id)? {
                    return Err(AccoladeError::NotFound(format!("lecturer {lecturer_id}")));
                }
                let id = lecturer_id.to_string();
                query_student_summaries(conn, "WHERE s.advisor_id = ?1", &[&id as &dyn rusqlite::ToSql])
            })
            .await
    }
}

fn require_profile(conn: &Connection, user_id: Uuid) -> Result<UserProfile> {
    load_profile(conn, &user_id.to_string())?
        .ok_or_else(|| AccoladeError::NotFound(format!("user {user_id}")))
}

fn lecturer_exists(conn: &Connection, id: Uuid) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM lecturers WHERE id = ?1", [id.to_string()], |_| Ok(()))
        .optional()?
        .is_some())
}

fn load_student_summary(conn: &Connection, id: Uuid) -> Result<StudentSummary> {
    let sql = format!("{SELECT_STUDENT_SUMMARY} WHERE s.id = ?1");
    let row = conn
        .query_row(&sql, [id.to_string()], StudentSummary::from_row)
        .optional()?
        .ok_or_else(|| AccoladeError::NotFound(format!("student {id}")))?;
    StudentSummary::build(row)
}

fn query_student_summaries(
    conn: &Connection,
    filter: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<StudentSummary>> {
    let sql = format!("{SELECT_STUDENT_SUMMARY} {filter} ORDER BY s.student_id");
    conn.prepare(&sql)?
        .query_map(params, StudentSummary::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .map(StudentSummary::build)
        .collect()
}

/// `StudentDirectory` over the `students` table
pub struct SqliteStudentDirectory {
    db: RelationalDb,
}

impl SqliteStudentDirectory {
    pub fn new(db: RelationalDb) -> Self {
        Self { db }
    }

    async fn find(&self, column: &'static str, value: String) -> Result<Option<Student>> {
        let row = self
            .db
            .run(move |conn| {
                let sql = format!("{SELECT_STUDENT} WHERE {column} = ?1");
                Ok(conn.query_row(&sql, [value], StudentRow::from_row).optional()?)
            })
            .await?;
        row.map(StudentRow::into_student).transpose()
    }
}

#[async_trait]
impl StudentDirectory for SqliteStudentDirectory {
    async fn resolve_by_account(&self, account_id: Uuid) -> Result<Option<Student>> {
        self.find("user_id", account_id.to_string()).await
    }

    async fn find_by_student_number(&self, student_number: &str) -> Result<Option<Student>> {
        self.find("student_id", student_number.to_string()).await
    }

    async fn count_students(&self) -> Result<u64> {
        let n: i64 = self
            .db
            .run(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?))
            .await?;
        Ok(n.max(0) as u64)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::verify_password;
    use crate::db::SqliteReferenceStore;
    use crate::store::ReferenceStore;

    pub(crate) fn student_user(number: &str) -> NewUser {
        NewUser {
            username: format!("s{number}"),
            email: format!("{number}@student.campus.ac.id"),
            password: "mahasiswa-pass".into(),
            full_name: "Siti Rahma".into(),
            role: roles::STUDENT.into(),
            is_active: true,
            student: Some(NewStudentProfile {
                student_id: number.into(),
                program_study: "Informatics".into(),
                academic_year: "2022".into(),
                advisor_id: None,
            }),
            lecturer: None,
        }
    }

    fn lecturer_user(code: &str) -> NewUser {
        NewUser {
            username: format!("dosen-{code}"),
            email: format!("{code}@campus.ac.id"),
            password: "dosen-wali-pass".into(),
            full_name: "Budi Santoso".into(),
            role: roles::ADVISOR.into(),
            is_active: true,
            student: None,
            lecturer: Some(NewLecturerProfile {
                lecturer_id: code.into(),
                department: "Informatics".into(),
            }),
        }
    }

    /// Insert a student account and return its profile
    pub(crate) async fn seed_student(db: &RelationalDb, number: &str) -> Student {
        AccountStore::new(db.clone())
            .create_user(student_user(number))
            .await
            .unwrap()
            .student
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_student_user() {
        let db = RelationalDb::open_in_memory().unwrap();
        let accounts = AccountStore::new(db.clone());

        let profile = accounts.create_user(student_user("20221030001")).await.unwrap();
        assert_eq!(profile.role, roles::STUDENT);
        assert!(profile.permissions.contains(&Permission::AchievementCreate));
        assert!(!profile.permissions.contains(&Permission::AchievementVerify));
        let student = profile.student.unwrap();
        assert_eq!(student.student_id, "20221030001");

        let directory = SqliteStudentDirectory::new(db);
        let resolved = directory.resolve_by_account(profile.id).await.unwrap();
        assert_eq!(resolved, Some(student.clone()));
        let by_number = directory.find_by_student_number("20221030001").await.unwrap();
        assert_eq!(by_number, Some(student));
        assert_eq!(directory.count_students().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_login_lookup_and_password() {
        let db = RelationalDb::open_in_memory().unwrap();
        let accounts = AccountStore::new(db);
        accounts.create_user(student_user("20221030001")).await.unwrap();

        let record = accounts
            .find_by_email("20221030001@Student.Campus.ac.id")
            .await
            .unwrap()
            .unwrap();
        assert!(record.is_active);
        assert!(verify_password("mahasiswa-pass", &record.password_hash).unwrap());
        assert!(accounts.find_by_email("nobody@campus.ac.id").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_profile_insert_rolls_back_user() {
        let db = RelationalDb::open_in_memory().unwrap();
        let accounts = AccountStore::new(db);
        accounts.create_user(student_user("20221030001")).await.unwrap();

        // Same student number, different account
        let mut dup = student_user("20221030001");
        dup.username = "other".into();
        dup.email = "other@student.campus.ac.id".into();
        let err = accounts.create_user(dup).await.unwrap_err();
        assert!(matches!(err, AccoladeError::InvalidState(_)));
        assert!(accounts
            .find_by_email("other@student.campus.ac.id")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_profile_role_mismatch_and_unknown_role() {
        let db = RelationalDb::open_in_memory().unwrap();
        let accounts = AccountStore::new(db);

        let mut wrong = student_user("20221030009");
        wrong.role = roles::ADVISOR.into();
        assert!(matches!(
            accounts.create_user(wrong).await,
            Err(AccoladeError::Validation(_))
        ));

        let mut unknown = student_user("20221030009");
        unknown.student = None;
        unknown.role = "Rektor".into();
        assert!(matches!(
            accounts.create_user(unknown).await,
            Err(AccoladeError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_ensure_admin_is_idempotent() {
        let db = RelationalDb::open_in_memory().unwrap();
        let accounts = AccountStore::new(db);

        assert!(accounts.ensure_admin("admin@campus.ac.id", "admin-password").await.unwrap());
        assert!(!accounts.ensure_admin("admin@campus.ac.id", "admin-password").await.unwrap());

        let admin = accounts.find_by_email("admin@campus.ac.id").await.unwrap().unwrap();
        let perms = accounts.permissions_for_role(admin.role_id).await.unwrap();
        assert_eq!(perms.len(), Permission::ALL.len());
        assert_eq!(accounts.list_profiles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_user_fields_and_deactivate() {
        let db = RelationalDb::open_in_memory().unwrap();
        let accounts = AccountStore::new(db);
        let created = accounts.create_user(student_user("20221030001")).await.unwrap();

        let updated = accounts
            .update_user(
                created.id,
                UserUpdate {
                    full_name: Some("Siti Rahmawati".into()),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.full_name, "Siti Rahmawati");
        assert_eq!(updated.username, created.username);
        assert!(!updated.is_active);

        let record = accounts
            .find_by_email("20221030001@student.campus.ac.id")
            .await
            .unwrap()
            .unwrap();
        assert!(!record.is_active);

        let blank = UserUpdate {
            username: Some("  ".into()),
            ..Default::default()
        };
        assert!(matches!(
            accounts.update_user(created.id, blank).await,
            Err(AccoladeError::Validation(_))
        ));
        assert!(matches!(
            accounts.update_user(Uuid::new_v4(), UserUpdate::default()).await,
            Err(AccoladeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_password_and_role_changes() {
        let db = RelationalDb::open_in_memory().unwrap();
        let accounts = AccountStore::new(db);
        let student = accounts.create_user(student_user("20221030001")).await.unwrap();

        accounts.set_password(student.id, "a-new-password").await.unwrap();
        let record = accounts.find_by_email(&student.email).await.unwrap().unwrap();
        assert!(verify_password("a-new-password", &record.password_hash).unwrap());
        assert!(!verify_password("mahasiswa-pass", &record.password_hash).unwrap());
        assert!(matches!(
            accounts.set_password(student.id, "short").await,
            Err(AccoladeError::Validation(_))
        ));

        // The student profile pins the role
        assert!(matches!(
            accounts.set_role(student.id, roles::ADMIN).await,
            Err(AccoladeError::InvalidState(_))
        ));

        let mut staff = student_user("unused");
        staff.username = "staff".into();
        staff.email = "staff@campus.ac.id".into();
        staff.student = None;
        staff.role = roles::ADMIN.into();
        let staff = accounts.create_user(staff).await.unwrap();
        let moved = accounts.set_role(staff.id, roles::ADVISOR).await.unwrap();
        assert_eq!(moved.role, roles::ADVISOR);
        assert!(moved.permissions.contains(&Permission::AchievementVerify));
        assert!(!moved.permissions.contains(&Permission::UserManage));
        assert!(matches!(
            accounts.set_role(staff.id, "Rektor").await,
            Err(AccoladeError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_advisor_assignment_and_advisees() {
        let db = RelationalDb::open_in_memory().unwrap();
        let accounts = AccountStore::new(db);
        let student = accounts
            .create_user(student_user("20221030001"))
            .await
            .unwrap()
            .student
            .unwrap();
        let lecturer = accounts
            .create_user(lecturer_user("L-001"))
            .await
            .unwrap()
            .lecturer
            .unwrap();

        let assigned = accounts.set_advisor(student.id, Some(lecturer.id)).await.unwrap();
        assert_eq!(assigned.student.advisor_id, Some(lecturer.id));
        assert_eq!(assigned.full_name, "Siti Rahma");

        let advisees = accounts.advisees(lecturer.id).await.unwrap();
        assert_eq!(advisees, vec![assigned.clone()]);
        assert_eq!(accounts.list_students().await.unwrap(), vec![assigned]);

        let lecturers = accounts.list_lecturers().await.unwrap();
        assert_eq!(lecturers.len(), 1);
        assert_eq!(lecturers[0].lecturer, lecturer);
        assert_eq!(lecturers[0].full_name, "Budi Santoso");

        assert!(matches!(
            accounts.set_advisor(student.id, Some(Uuid::new_v4())).await,
            Err(AccoladeError::Validation(_))
        ));
        assert!(matches!(
            accounts.set_advisor(Uuid::new_v4(), Some(lecturer.id)).await,
            Err(AccoladeError::NotFound(_))
        ));
        assert!(matches!(
            accounts.advisees(Uuid::new_v4()).await,
            Err(AccoladeError::NotFound(_))
        ));

        let cleared = accounts.set_advisor(student.id, None).await.unwrap();
        assert_eq!(cleared.student.advisor_id, None);
        assert!(accounts.advisees(lecturer.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_lecturer_clears_advisor() {
        let db = RelationalDb::open_in_memory().unwrap();
        let accounts = AccountStore::new(db);
        let student = accounts
            .create_user(student_user("20221030001"))
            .await
            .unwrap()
            .student
            .unwrap();
        let lecturer = accounts.create_user(lecturer_user("L-001")).await.unwrap();
        let lecturer_profile = lecturer.lecturer.clone().unwrap();
        accounts
            .set_advisor(student.id, Some(lecturer_profile.id))
            .await
            .unwrap();

        let removed = accounts.delete_user(lecturer.id).await.unwrap();
        assert_eq!(removed.id, lecturer.id);
        assert!(accounts.list_lecturers().await.unwrap().is_empty());
        assert_eq!(accounts.student(student.id).await.unwrap().student.advisor_id, None);
        assert!(matches!(
            accounts.profile(lecturer.id).await,
            Err(AccoladeError::NotFound(_))
        ));
        assert!(matches!(
            accounts.delete_user(lecturer.id).await,
            Err(AccoladeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_student_with_records_is_refused() {
        let db = RelationalDb::open_in_memory().unwrap();
        let accounts = AccountStore::new(db.clone());
        let with_records = accounts.create_user(student_user("20221030001")).await.unwrap();
        let without = accounts.create_user(student_user("20221030002")).await.unwrap();

        let student_id = with_records.student.as_ref().unwrap().id;
        SqliteReferenceStore::new(db)
            .insert(student_id, "665f1c2e9b1d4a0012345678")
            .await
            .unwrap();

        assert!(matches!(
            accounts.delete_user(with_records.id).await,
            Err(AccoladeError::InvalidState(_))
        ));
        assert!(accounts.profile(with_records.id).await.is_ok());

        accounts.delete_user(without.id).await.unwrap();
        let left = accounts.list_students().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].student.id, student_id);
    }
}

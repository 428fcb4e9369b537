//! Persistence for Accolade
//!
//! Achievement content lives in MongoDB; accounts, roles and achievement
//! references live in SQLite.

pub mod accounts;
pub mod achievements;
pub mod mongo;
pub mod references;
pub mod schemas;
pub mod sqlite;

pub use accounts::{
    AccountRecord, AccountStore, Lecturer, LecturerSummary, NewUser, SqliteStudentDirectory,
    StudentSummary, UserProfile, UserUpdate,
};
pub use achievements::MongoAchievementStore;
pub use mongo::{MongoClient, MongoCollection};
pub use references::SqliteReferenceStore;
pub use schemas::{AchievementDoc, Metadata};
pub use sqlite::RelationalDb;

//! Accolade - student achievement records service
//!
//! Students record achievements as drafts and submit them; advisors verify or
//! reject them; administrators provision accounts and read reports.
//!
//! ## Layout
//!
//! - **achievement**: lifecycle coordinator, attachments, consistency checks
//! - **auth**: permissions, JWT, revocation, authorization gate
//! - **store**: collaborator traits and in-memory implementations
//! - **db**: MongoDB (achievement documents) and SQLite (accounts, references)
//! - **routes** / **server**: hyper HTTP surface

pub mod achievement;
pub mod auth;
pub mod config;
pub mod db;
pub mod reports;
pub mod routes;
pub mod server;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{AccoladeError, Result};

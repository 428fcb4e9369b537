//! Achievement lifecycle
//!
//! Domain types, the status machine, and the coordinator that keeps the
//! document store and the reference store in step.

pub mod attachments;
pub mod lifecycle;
mod model;
pub mod reconcile;
mod status;

pub use attachments::{AttachmentStorage, AttachmentUpload};
pub use lifecycle::LifecycleCoordinator;
pub use model::{
    is_document_id, Achievement, AchievementPatch, AchievementRecord, AchievementReference,
    Attachment, NewAchievement, ReferenceStamp, StatusSnapshot, Student,
};
pub use reconcile::{spawn_reconcile_task, ConsistencyReport, Reconciler};
pub use status::{AchievementStatus, Transition};

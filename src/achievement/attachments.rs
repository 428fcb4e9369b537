//! Attachment uploads
//!
//! Evidence files are kept on local disk under one directory per achievement:
//!
//! ```text
//! <upload_dir>/<achievement-id>/<unix-nanos>.<ext>
//! ```
//!
//! Only `.png`, `.jpg`, `.jpeg` and `.pdf` are accepted. The extension check
//! runs before anything touches the disk or the document store.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use chrono::Utc;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::model::{is_document_id, Attachment};
use crate::types::{AccoladeError, Result};

/// Accepted file extensions (lowercase, without the dot)
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "pdf"];

/// Attempts at finding an unused generated name before giving up
const NAME_ATTEMPTS: u32 = 8;

/// A file as received from the client
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    /// Client-supplied original file name
    pub file_name: String,
    pub bytes: Bytes,
}

impl AttachmentUpload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Lowercased extension if it is on the whitelist
    pub fn extension(&self) -> Result<String> {
        allowed_extension(&self.file_name)
    }
}

/// Validate a file name against the extension whitelist
pub fn allowed_extension(file_name: &str) -> Result<String> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .ok_or_else(|| AccoladeError::Validation(format!("file '{file_name}' has no extension")))?;

    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(AccoladeError::Validation(format!(
            "file type .{ext} not allowed (accepted: {})",
            ALLOWED_EXTENSIONS.join(", ")
        )))
    }
}

/// MIME type recorded on the attachment
pub fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

/// Write `bytes` through `file`; a failed write removes `path` again
async fn write_or_remove<W>(file: &mut W, path: &Path, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = written {
        if let Err(rm) = fs::remove_file(path).await {
            warn!(path = %path.display(), error = %rm, "Failed to remove partial attachment");
        }
        return Err(e.into());
    }
    Ok(())
}

/// Per-achievement attachment directory on local disk
pub struct AttachmentStorage {
    root_dir: PathBuf,
    max_bytes: usize,
}

impl AttachmentStorage {
    pub fn new(root_dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            root_dir: root_dir.into(),
            max_bytes,
        }
    }

    /// Check size and extension without writing anything
    pub fn check(&self, upload: &AttachmentUpload) -> Result<String> {
        let ext = upload.extension()?;
        if upload.bytes.is_empty() {
            return Err(AccoladeError::Validation("attachment is empty".into()));
        }
        if upload.bytes.len() > self.max_bytes {
            return Err(AccoladeError::Validation(format!(
                "attachment exceeds {} bytes",
                self.max_bytes
            )));
        }
        Ok(ext)
    }

    /// Write the upload to disk and describe it as an `Attachment`
    pub async fn save(&self, achievement_id: &str, upload: &AttachmentUpload) -> Result<Attachment> {
        let ext = self.check(upload)?;
        if !is_document_id(achievement_id) {
            return Err(AccoladeError::Validation(format!(
                "invalid achievement id: {achievement_id}"
            )));
        }

        let dir = self.root_dir.join(achievement_id);
        fs::create_dir_all(&dir).await?;

        for attempt in 0..NAME_ATTEMPTS {
            let path = dir.join(format!("{}.{ext}", unix_nanos()));
            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(attempt, path = %path.display(), "Generated attachment name taken");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            write_or_remove(&mut file, &path, &upload.bytes).await?;

            info!(
                achievement_id = %achievement_id,
                path = %path.display(),
                size = upload.bytes.len(),
                "Stored attachment"
            );
            return Ok(Attachment {
                file_name: upload.file_name.clone(),
                file_path: path.to_string_lossy().into_owned(),
                file_type: content_type_for(&ext).to_string(),
                uploaded_at: Utc::now(),
            });
        }

        Err(AccoladeError::Internal(format!(
            "could not allocate an attachment name under {}",
            dir.display()
        )))
    }

    /// Best-effort removal of a file whose document update did not land
    pub async fn discard(&self, attachment: &Attachment) {
        if let Err(e) = fs::remove_file(&attachment.file_path).await {
            warn!(path = %attachment.file_path, error = %e, "Failed to discard attachment");
        }
    }
}

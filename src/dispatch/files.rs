//! Scratch directories and changed-file tracking.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::error::WorkspaceError;

/// Directory and file names never reported as changed.
const IGNORED_NAMES: &[&str] = &["__pycache__"];

/// Extensions never reported as changed.
const IGNORED_EXTENSIONS: &[&str] = &["pyc", "cache"];

const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "ts", "tsx", "java", "c", "cpp", "cs", "go", "rs", "rb", "php", "swift",
    "kt", "scala", "sh", "bash", "html", "css", "scss", "json", "yaml", "yml", "toml", "md",
    "txt", "sql", "r", "ipynb",
];

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff", "svg", "webp", "ico"];

const CSV_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls", "tsv"];

/// A file written during a task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Path relative to the files root (forward slashes).
    pub path: String,
    pub name: String,
    pub extension: String,
    #[serde(rename = "type")]
    pub file_type: String,
}

/// Coarse file category shown by the UI.
pub fn file_type(extension: &str) -> &'static str {
    let ext = extension.to_ascii_lowercase();
    if CODE_EXTENSIONS.contains(&ext.as_str()) {
        "code"
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        "image"
    } else if ext == "pdf" {
        "pdf"
    } else if CSV_EXTENSIONS.contains(&ext.as_str()) {
        "csv"
    } else {
        "unknown"
    }
}

/// Per-user directory under the files root. The user id is hashed into a
/// stable, filesystem-safe name.
pub fn user_dir(files_root: &Path, user_id: Option<&str>) -> PathBuf {
    let key = Uuid::new_v5(&Uuid::NAMESPACE_OID, user_id.unwrap_or("default").as_bytes());
    files_root.join("user").join(key.simple().to_string())
}

/// Fresh working directory for one run: `<user_dir>/<session>/<timestamp>`.
pub fn work_dir(user_dir: &Path, session_id: Option<&str>, now: DateTime<Utc>) -> PathBuf {
    user_dir
        .join(session_id.unwrap_or("default"))
        .join(now.format("%Y%m%d_%H-%M-%S-%6f").to_string())
}

/// Lists files changed inside a directory during a time window.
#[async_trait]
pub trait ChangeTracker: Send + Sync {
    async fn list_changed(
        &self,
        start: SystemTime,
        end: SystemTime,
        dir: &Path,
    ) -> Result<Vec<FileDescriptor>, WorkspaceError>;
}

/// Walks the directory and reports files whose mtime falls in the window.
pub struct ModifiedFiles {
    files_root: PathBuf,
}

impl ModifiedFiles {
    pub fn new(files_root: PathBuf) -> Self {
        Self { files_root }
    }

    fn describe(&self, path: &Path) -> FileDescriptor {
        let relative = path
            .strip_prefix(&self.files_root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();

        FileDescriptor {
            path: relative,
            name,
            file_type: file_type(&extension).to_string(),
            extension,
        }
    }
}

fn is_ignored(path: &Path) -> bool {
    let name_ignored = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| IGNORED_NAMES.contains(&n));
    let ext_ignored = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IGNORED_EXTENSIONS.contains(&e));
    name_ignored || ext_ignored
}

#[async_trait]
impl ChangeTracker for ModifiedFiles {
    async fn list_changed(
        &self,
        start: SystemTime,
        end: SystemTime,
        dir: &Path,
    ) -> Result<Vec<FileDescriptor>, WorkspaceError> {
        let mut changed = Vec::new();
        let mut pending = vec![dir.to_path_buf()];

        // Unreadable parts of the tree are skipped; the run itself already finished.
        while let Some(current) = pending.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %current.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(dir = %current.display(), error = %e, "Directory listing cut short");
                        break;
                    }
                };
                let path = entry.path();
                if is_ignored(&path) {
                    continue;
                }
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                        continue;
                    }
                };
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                match metadata.modified() {
                    Ok(modified) if modified >= start && modified <= end => {
                        changed.push(self.describe(&path));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "No modification time");
                    }
                }
            }
        }

        changed.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(changed)
    }
}

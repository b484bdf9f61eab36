//! Upload staging: validate an inbound blob and persist it into a workspace.
//!
//! Format policy lives in the registry; staging only guarantees a safe name
//! and a present extension.

use crate::error::{AppError, Result};
use crate::workspace::Workspace;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// One uploaded blob as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub data: Bytes,
}

impl Upload {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }
}

/// A blob written into a workspace.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: PathBuf,
    /// Lower-cased extension without the dot.
    pub extension: String,
    /// Sanitized client filename, used to name the download.
    pub original_name: String,
}

impl StagedFile {
    pub fn original_stem(&self) -> &str {
        Path::new(&self.original_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("output")
    }
}

/// Reject traversal and empty names; strip control characters.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let cleaned: String = name.trim().chars().filter(|c| !c.is_control()).collect();

    if cleaned.is_empty() {
        return Err(AppError::Validation("filename is empty".to_string()));
    }
    if cleaned.contains('/') || cleaned.contains('\\') || cleaned.contains("..") {
        return Err(AppError::Validation(format!(
            "filename '{}' must not contain path separators or '..'",
            cleaned
        )));
    }
    if cleaned.starts_with('.') {
        return Err(AppError::Validation(format!(
            "filename '{}' has no name before its extension",
            cleaned
        )));
    }

    Ok(cleaned)
}

/// Longest file name most filesystems accept, in bytes.
const NAME_MAX: usize = 255;
/// `<32 hex>_` prefix added to every staged name.
const TOKEN_LEN: usize = 33;

/// Shorten the stem of `name` so `<token>_<name>` fits in `NAME_MAX`,
/// keeping the extension intact.
fn disk_name(name: &str) -> Result<String> {
    let budget = NAME_MAX - TOKEN_LEN;
    if name.len() <= budget {
        return Ok(name.to_string());
    }

    let suffix_len = Path::new(name)
        .extension()
        .map_or(0, |e| e.len() + 1);
    if suffix_len >= budget {
        return Err(AppError::Validation(format!(
            "extension of '{}' is too long",
            name
        )));
    }

    let stem = &name[..name.len() - suffix_len];
    let mut end = budget - suffix_len;
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    Ok(format!("{}{}", &stem[..end], &name[stem.len()..]))
}

fn extension_of(name: &str) -> Result<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| AppError::Validation(format!("filename '{}' has no extension", name)))
}

/// Persist `upload` under `workspace/<subdir>` as `<token>_<name>`.
pub async fn stage(workspace: &Workspace, upload: &Upload, subdir: &str) -> Result<StagedFile> {
    if upload.data.is_empty() {
        return Err(AppError::Validation(format!(
            "file '{}' is empty",
            upload.filename
        )));
    }

    let original_name = sanitize_filename(&upload.filename)?;
    let extension = extension_of(&original_name)?;

    let dir = workspace.path().join(subdir);
    tokio::fs::create_dir_all(&dir).await?;

    let token = Uuid::new_v4().simple().to_string();
    let path = dir.join(format!(
        "{}_{}",
        token,
        disk_name(&original_name)?
    ));
    tokio::fs::write(&path, &upload.data).await?;

    debug!(
        "Staged {} ({} bytes) as {}",
        original_name,
        upload.data.len(),
        path.display()
    );

    Ok(StagedFile {
        path,
        extension,
        original_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceManager;

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert!(sanitize_filename("../etc/passwd").is_err());
        assert!(sanitize_filename("a/b.pdf").is_err());
        assert!(sanitize_filename("a\\b.pdf").is_err());
        assert!(sanitize_filename("   ").is_err());
        assert!(sanitize_filename(".pdf").is_err());
        assert_eq!(sanitize_filename(" report.pdf ").unwrap(), "report.pdf");
        assert_eq!(sanitize_filename("re\u{0}port.pdf").unwrap(), "report.pdf");
    }

    #[tokio::test]
    async fn test_stage_writes_blob_unchanged() {
        let root = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path()).acquire().await.unwrap();

        let staged = stage(&workspace, &Upload::new("Photo.JPG", vec![1u8, 2, 3]), "input")
            .await
            .unwrap();

        assert_eq!(staged.extension, "jpg");
        assert_eq!(staged.original_stem(), "Photo");
        assert!(staged.path.starts_with(workspace.input_dir()));
        assert_eq!(tokio::fs::read(&staged.path).await.unwrap(), vec![1, 2, 3]);

        workspace.release().await;
    }

    #[tokio::test]
    async fn test_long_name_is_shortened_on_disk() {
        let root = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path()).acquire().await.unwrap();
        let long = format!("{}.png", "a".repeat(240));

        let staged = stage(&workspace, &Upload::new(long.clone(), vec![7u8]), "input")
            .await
            .unwrap();

        let on_disk = staged.path.file_name().unwrap().to_str().unwrap();
        assert!(on_disk.len() <= NAME_MAX);
        assert!(on_disk.ends_with(".png"));
        assert_eq!(staged.extension, "png");
        assert_eq!(staged.original_name, long);

        workspace.release().await;
    }

    #[test]
    fn test_disk_name_respects_char_boundaries() {
        let name = format!("{}.pdf", "é".repeat(200));
        let shortened = disk_name(&name).unwrap();
        assert!(shortened.len() <= NAME_MAX - TOKEN_LEN);
        assert!(shortened.ends_with("é.pdf"));

        let ext = "x".repeat(230);
        assert!(matches!(
            disk_name(&format!("a.{}", ext)),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_identical_names_do_not_collide() {
        let root = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path()).acquire().await.unwrap();
        let upload = Upload::new("scan.png", vec![9u8]);

        let a = stage(&workspace, &upload, "input").await.unwrap();
        let b = stage(&workspace, &upload, "input").await.unwrap();

        assert_ne!(a.path, b.path);
        workspace.release().await;
    }

    #[tokio::test]
    async fn test_stage_rejects_missing_extension_and_empty_blob() {
        let root = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::new(root.path()).acquire().await.unwrap();

        let no_ext = stage(&workspace, &Upload::new("README", vec![1u8]), "input").await;
        assert!(matches!(no_ext, Err(AppError::Validation(_))));

        let empty = stage(&workspace, &Upload::new("a.pdf", Vec::<u8>::new()), "input").await;
        assert!(matches!(empty, Err(AppError::Validation(_))));

        workspace.release().await;
    }
}

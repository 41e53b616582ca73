//! Media file placement

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// File extension for a content type, `image/jpeg` -> `jpeg`
pub fn media_extension(content_type: &str) -> &str {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    match essence.split_once('/') {
        Some((_, subtype)) if !subtype.is_empty() => subtype,
        _ => "bin",
    }
}

/// `{root}/{audit_id}/{media_id}.{ext}`
pub fn media_path(root: &Path, audit_id: &str, media_id: &str, content_type: &str) -> PathBuf {
    root.join(audit_id)
        .join(format!("{media_id}.{}", media_extension(content_type)))
}

pub(crate) async fn write_media_file(
    root: &Path,
    audit_id: &str,
    media_id: &str,
    content_type: &str,
    body: &[u8],
) -> Result<PathBuf> {
    if audit_id.is_empty() || media_id.is_empty() {
        return Err(Error::storage("media needs an inspection id and a media id"));
    }
    let path = media_path(root, audit_id, media_id, content_type);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

//! Validation of local files submitted for preprocessing, and naming rules
//! for files uploaded into the data directory.

use std::path::{Path, PathBuf};

use omnisia_core::config::UploadConfig;

use crate::error::ApiError;

/// Check that `path` names an existing regular file with an accepted
/// extension and a size within `max_file_bytes`.
pub fn validate_file(path: &Path, config: &UploadConfig) -> Result<u64, ApiError> {
    let metadata = std::fs::metadata(path)
        .map_err(|_| ApiError::NotFound(format!("file not found: {}", path.display())))?;
    if !metadata.is_file() {
        return Err(ApiError::NotFound(format!("not a file: {}", path.display())));
    }

    check_extension(path, config)?;

    let size = metadata.len();
    if size > config.max_file_bytes {
        return Err(ApiError::UnprocessableEntity(format!(
            "file too large: {} bytes (max {})",
            size, config.max_file_bytes
        )));
    }
    Ok(size)
}

/// Reject names whose extension is not in `allowed_extensions`.
pub fn check_extension(path: &Path, config: &UploadConfig) -> Result<(), ApiError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    if !config.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)) {
        return Err(ApiError::UnprocessableEntity(format!(
            "file type not allowed: {}",
            if ext.is_empty() { "(none)" } else { &ext }
        )));
    }
    Ok(())
}

/// Subdirectory of the data directory holding uploaded files.
pub const UPLOAD_DIR_NAME: &str = "uploads";

pub fn upload_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(UPLOAD_DIR_NAME)
}

/// Reduce a client-supplied file name to its last path component.
///
/// Both `/` and `\` count as separators. Empty names and names starting
/// with a dot are rejected; the upload directory uses dot names for
/// partial writes.
pub fn sanitize_file_name(name: &str) -> Result<String, ApiError> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() || base.starts_with('.') || base.contains('\0') {
        return Err(ApiError::BadRequest(format!("invalid file name: {:?}", name)));
    }
    Ok(base.to_string())
}

/// True for files whose text is read as-is instead of extracted.
pub fn is_plain_text(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("txt"))
}

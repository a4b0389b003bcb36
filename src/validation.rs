use crate::error::BridgeError;
use std::path::{Component, Path, PathBuf};

/// Maximum size of a terminal export accepted for upload (50MB)
pub const MAX_EXPORT_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Validate that a file path is safe and inside the watched folder
///
/// Prevents path traversal by:
/// - Rejecting paths with ".." components
/// - Resolving the canonical path (follows symlinks)
/// - Checking it starts with the canonical watched folder
pub fn validate_file_path(path: &Path, watched_folder: &Path) -> Result<PathBuf, BridgeError> {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(BridgeError::Validation(format!(
            "Path contains '..' component: {}",
            path.display()
        )));
    }

    let canonical = path.canonicalize().map_err(|e| {
        BridgeError::Validation(format!(
            "Failed to resolve path '{}': {}",
            path.display(),
            e
        ))
    })?;

    let folder = watched_folder.canonicalize().map_err(|e| {
        BridgeError::Validation(format!(
            "Failed to resolve watched folder '{}': {}",
            watched_folder.display(),
            e
        ))
    })?;

    if !canonical.starts_with(&folder) {
        return Err(BridgeError::Validation(format!(
            "Path is outside the watched folder: {}",
            canonical.display()
        )));
    }

    Ok(canonical)
}

/// Validate file size is within the specified limit
pub fn validate_file_size(path: &Path, max_size: u64) -> Result<u64, BridgeError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        BridgeError::Validation(format!(
            "Failed to get file metadata for '{}': {}",
            path.display(),
            e
        ))
    })?;

    let size = metadata.len();

    if size > max_size {
        return Err(BridgeError::Validation(format!(
            "File size ({} bytes) exceeds maximum allowed size ({} bytes): {}",
            size,
            max_size,
            path.display()
        )));
    }

    Ok(size)
}

/// Validate both path and size for an export file
pub fn validate_export_file(
    path: &Path,
    watched_folder: &Path,
) -> Result<(PathBuf, u64), BridgeError> {
    let canonical_path = validate_file_path(path, watched_folder)?;
    let size = validate_file_size(&canonical_path, MAX_EXPORT_FILE_SIZE)?;
    Ok((canonical_path, size))
}

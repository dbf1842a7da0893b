/// Local files holding cluster credentials
use anyhow::{Context, Result};
use std::path::Path;

/// Restrict a directory to its owner (0700)
pub async fn restrict_dir(path: &Path) -> Result<()> {
    set_mode(path, 0o700).await
}

/// Restrict a file to its owner (0600)
pub async fn restrict_file(path: &Path) -> Result<()> {
    set_mode(path, 0o600).await
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .with_context(|| format!("Failed to restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Remove a file or directory tree; returns false when nothing was there
pub async fn remove_path(path: &Path) -> Result<bool> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to inspect {}", path.display()))
        }
    };

    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
    .with_context(|| format!("Failed to remove {}", path.display()))?;

    Ok(true)
}

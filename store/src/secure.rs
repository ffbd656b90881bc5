//! Secure filesystem preparation for the enrollment database.
//!
//! Enrollment records carry learner identifiers, so the database directory
//! and file are created owner-only on Unix (0o700 / 0o600), including the
//! SQLite WAL/SHM sidecars.

use std::fs::OpenOptions;
use std::path::Path;

use crate::StoreError;

/// Create the parent directory and database file with tightened permissions.
pub(crate) fn prepare_store_path(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Prepare {
            path: parent.to_path_buf(),
            source,
        })?;
        tighten_dir_permissions(parent)?;
    }
    create_db_file(path)?;
    tighten_file_permissions(path);
    Ok(())
}

fn create_db_file(path: &Path) -> Result<(), StoreError> {
    if path.exists() {
        return Ok(());
    }
    let mut options = OpenOptions::new();
    options.create(true).truncate(false).read(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path).map_err(|source| StoreError::Prepare {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(unix)]
fn tighten_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let metadata = std::fs::metadata(path).map_err(|source| StoreError::Prepare {
        path: path.to_path_buf(),
        source,
    })?;

    // Only tighten directories we own; shared parents are left alone.
    let our_uid = unsafe { libc::getuid() };
    if metadata.uid() != our_uid {
        return Ok(());
    }

    if metadata.permissions().mode() & 0o077 != 0 {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).map_err(
            |source| StoreError::Prepare {
                path: path.to_path_buf(),
                source,
            },
        )?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn tighten_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn tighten_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    for suffix in ["-wal", "-shm"] {
        let sidecar = match path.file_name() {
            Some(name) => path.with_file_name(format!("{}{suffix}", name.to_string_lossy())),
            None => continue,
        };
        if sidecar.exists() {
            let _ = std::fs::set_permissions(&sidecar, std::fs::Permissions::from_mode(0o600));
        }
    }
}

#[cfg(not(unix))]
fn tighten_file_permissions(_path: &Path) {}

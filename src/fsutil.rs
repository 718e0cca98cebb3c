//! Whole-file reads and writes.
//!
//! Inputs are read to completion before use. Outputs are written to a
//! temporary file in the destination directory and renamed into place, so
//! readers see either the old file or the new one.

use crate::error::{Result, StmgrError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Permission bits for keys, certificates and host configuration.
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// Permission bits for package archives and descriptors.
pub const PUBLIC_FILE_MODE: u32 = 0o644;

/// Read a whole input file, mapping "not found" to a named error.
pub fn read_input(what: &'static str, path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => StmgrError::InputNotFound {
            what,
            path: path.to_path_buf(),
        },
        _ => StmgrError::IoError(e),
    })
}

/// Atomically replace `path` with `contents`, using `mode` on unix.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir)?;
    set_mode(file.as_file(), mode)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path)
        .map_err(|e| StmgrError::IoError(e.error))?;

    tracing::debug!(path = %path.display(), bytes = contents.len(), "wrote file");
    Ok(())
}

/// Atomically write a file readable only by its owner.
pub fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    write_atomic(path, contents, PRIVATE_FILE_MODE)
}

#[cfg(unix)]
fn set_mode(file: &fs::File, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_file: &fs::File, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");

        write_atomic(&path, b"first", PUBLIC_FILE_MODE).unwrap();
        write_atomic(&path, b"second", PUBLIC_FILE_MODE).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        // No temporary files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_private_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key.pem");
        write_private(&path, b"secret").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_read_input_not_found() {
        let dir = TempDir::new().unwrap();
        let result = read_input("kernel", &dir.path().join("vmlinuz"));
        assert!(matches!(
            result,
            Err(StmgrError::InputNotFound { what: "kernel", .. })
        ));
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("file");
        assert!(write_atomic(&path, b"x", PUBLIC_FILE_MODE).is_err());
    }
}

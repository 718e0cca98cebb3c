//! Naming of the two files that make up an OS package.
//!
//! An OS package is `<base>.zip` (archive) next to `<base>.json` (descriptor).

use crate::error::{Result, StmgrError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_NAME: &str = "system-transparency-os-package";
pub const ARCHIVE_EXTENSION: &str = "zip";
pub const DESCRIPTOR_EXTENSION: &str = "json";

/// Locations of an OS package's archive and descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePaths {
    pub archive: PathBuf,
    pub descriptor: PathBuf,
}

impl PackagePaths {
    fn from_base(base: &Path) -> Self {
        Self {
            archive: with_suffix(base, ARCHIVE_EXTENSION),
            descriptor: with_suffix(base, DESCRIPTOR_EXTENSION),
        }
    }
}

/// Resolve the output location of a new package.
///
/// No path or a directory yields the default base name (inside that
/// directory). A file name has a `.zip`/`.json` extension stripped so both
/// outputs share its base name.
pub fn resolve_output(out: Option<&Path>) -> PackagePaths {
    let out = match out {
        Some(path) if !path.as_os_str().is_empty() => path,
        _ => return PackagePaths::from_base(Path::new(DEFAULT_BASE_NAME)),
    };

    let names_directory = out.is_dir()
        || out
            .as_os_str()
            .to_string_lossy()
            .ends_with(std::path::MAIN_SEPARATOR);
    if names_directory {
        return PackagePaths::from_base(&out.join(DEFAULT_BASE_NAME));
    }

    PackagePaths::from_base(&strip_package_extension(out))
}

/// Locate both files of an existing package from either one of them.
pub fn resolve_package(path: &Path) -> Result<PackagePaths> {
    let paths = PackagePaths::from_base(&strip_package_extension(path));

    for file in [&paths.archive, &paths.descriptor] {
        if !file.is_file() {
            return Err(StmgrError::PackageNotFound(file.clone()));
        }
    }

    Ok(paths)
}

fn strip_package_extension(path: &Path) -> PathBuf {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ARCHIVE_EXTENSION) | Some(DESCRIPTOR_EXTENSION) => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

/// Append `.ext` without touching dots already in the name.
fn with_suffix(base: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_output() {
        let paths = resolve_output(None);
        assert_eq!(
            paths.archive,
            PathBuf::from("system-transparency-os-package.zip")
        );
        assert_eq!(
            paths.descriptor,
            PathBuf::from("system-transparency-os-package.json")
        );
    }

    #[test]
    fn test_directory_output() {
        let dir = TempDir::new().unwrap();
        let paths = resolve_output(Some(dir.path()));
        assert_eq!(
            paths.archive,
            dir.path().join("system-transparency-os-package.zip")
        );
    }

    #[test]
    fn test_file_output_extensions_normalized() {
        for name in ["out/pkg", "out/pkg.zip", "out/pkg.json"] {
            let paths = resolve_output(Some(Path::new(name)));
            assert_eq!(paths.archive, PathBuf::from("out/pkg.zip"));
            assert_eq!(paths.descriptor, PathBuf::from("out/pkg.json"));
        }
    }

    #[test]
    fn test_dotted_names_kept() {
        let paths = resolve_output(Some(Path::new("debian-12.1")));
        assert_eq!(paths.archive, PathBuf::from("debian-12.1.zip"));
        assert_eq!(paths.descriptor, PathBuf::from("debian-12.1.json"));
    }

    #[test]
    fn test_resolve_package_from_either_file() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pkg.zip");
        let descriptor = dir.path().join("pkg.json");
        fs::write(&archive, b"zip").unwrap();
        fs::write(&descriptor, b"{}").unwrap();

        let from_archive = resolve_package(&archive).unwrap();
        let from_descriptor = resolve_package(&descriptor).unwrap();
        assert_eq!(from_archive, from_descriptor);
        assert_eq!(from_archive.descriptor, descriptor);
    }

    #[test]
    fn test_resolve_package_missing_sibling() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pkg.zip");
        fs::write(&archive, b"zip").unwrap();

        match resolve_package(&archive) {
            Err(StmgrError::PackageNotFound(path)) => {
                assert_eq!(path, dir.path().join("pkg.json"));
            }
            other => panic!("Expected PackageNotFound, got {:?}", other),
        }
    }
}

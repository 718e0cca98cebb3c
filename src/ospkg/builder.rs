//! Building OS packages from kernel, initramfs and command line.

use crate::crypto::hash::sha256_hex;
use crate::error::{Result, StmgrError};
use crate::fsutil::{read_input, write_atomic, PUBLIC_FILE_MODE};
use crate::ospkg::archive::{write_archive, ArchiveContents};
use crate::ospkg::descriptor::{Descriptor, DESCRIPTOR_VERSION};
use crate::ospkg::paths::{resolve_output, PackagePaths};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Prefix of the label generated when none is given.
pub const DEFAULT_LABEL_PREFIX: &str = "System Transparency OS package";

/// Inputs of [`build`]. Empty strings count as absent.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Output file or directory, see [`resolve_output`].
    pub out: Option<PathBuf>,
    pub label: Option<String>,
    /// Where the archive is served from in network boot mode.
    pub url: Option<String>,
    pub kernel: Option<PathBuf>,
    pub initramfs: Option<PathBuf>,
    pub cmdline: Option<String>,
}

/// Build an OS package and write its archive and descriptor.
pub fn build(opts: &BuildOptions) -> Result<PackagePaths> {
    let kernel_path = opts
        .kernel
        .as_deref()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| StmgrError::MissingKernel("no kernel given".to_string()))?;

    let kernel = fs::read(kernel_path)
        .map_err(|e| StmgrError::MissingKernel(format!("{}: {}", kernel_path.display(), e)))?;

    let initramfs = match opts.initramfs.as_deref().filter(|p| !p.as_os_str().is_empty()) {
        Some(path) => Some(read_input("initramfs", path)?),
        None => None,
    };

    let label = match non_empty(&opts.label) {
        Some(label) => label.to_string(),
        None => default_label(kernel_path),
    };

    let url = non_empty(&opts.url).map(str::to_string);
    if let Some(url) = &url {
        check_url(url)?;
    }

    let contents = ArchiveContents {
        kernel,
        initramfs,
        cmdline: opts.cmdline.clone().unwrap_or_default(),
    };
    let (descriptor, archive) = create_package(label, url, &contents)?;

    let paths = resolve_output(opts.out.as_deref());
    write_atomic(&paths.archive, &archive, PUBLIC_FILE_MODE)?;
    descriptor.save(&paths.descriptor)?;

    info!(
        archive = %paths.archive.display(),
        descriptor = %paths.descriptor.display(),
        kernel_hash = %descriptor.kernel_hash,
        "created OS package"
    );

    Ok(paths)
}

/// Assemble the descriptor and archive bytes for already loaded inputs.
///
/// The descriptor hashes depend only on `contents`.
pub fn create_package(
    label: String,
    url: Option<String>,
    contents: &ArchiveContents,
) -> Result<(Descriptor, Vec<u8>)> {
    let descriptor = Descriptor {
        version: DESCRIPTOR_VERSION,
        label,
        url,
        cmdline: contents.cmdline.clone(),
        kernel_hash: sha256_hex(&contents.kernel),
        initramfs_hash: contents.initramfs.as_deref().map(sha256_hex),
        cmdline_hash: sha256_hex(contents.cmdline.as_bytes()),
        signatures: Vec::new(),
    };
    descriptor.validate()?;

    let archive = write_archive(contents)?;
    Ok((descriptor, archive))
}

/// `System Transparency OS package <kernel file name>`.
pub fn default_label(kernel_path: &Path) -> String {
    let name = kernel_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| kernel_path.display().to_string());
    format!("{} {}", DEFAULT_LABEL_PREFIX, name)
}

fn check_url(url: &str) -> Result<()> {
    let has_host = |rest: &str| !rest.is_empty() && !rest.starts_with('/');
    match url.split_once("://") {
        Some(("http", rest)) | Some(("https", rest)) if has_host(rest) => Ok(()),
        _ => Err(StmgrError::ParseError(format!(
            "OS package URL must be an http(s) URL: {}",
            url
        ))),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ospkg::archive::read_archive;
    use tempfile::TempDir;

    fn write_kernel(dir: &Path) -> PathBuf {
        let path = dir.join("vmlinuz");
        fs::write(&path, b"0123456789").unwrap();
        path
    }

    #[test]
    fn test_build_minimal_package() {
        let dir = TempDir::new().unwrap();
        let opts = BuildOptions {
            out: Some(dir.path().to_path_buf()),
            kernel: Some(write_kernel(dir.path())),
            cmdline: Some("console=ttyS0".to_string()),
            ..Default::default()
        };

        let paths = build(&opts).unwrap();
        let descriptor = Descriptor::load(&paths.descriptor).unwrap();

        assert_eq!(descriptor.kernel_hash, sha256_hex(b"0123456789"));
        assert_eq!(descriptor.initramfs_hash, None);
        assert_eq!(descriptor.label, "System Transparency OS package vmlinuz");
        assert_eq!(descriptor.cmdline, "console=ttyS0");
        assert!(descriptor.signatures.is_empty());

        let contents = read_archive(&fs::read(&paths.archive).unwrap()).unwrap();
        assert_eq!(contents.kernel, b"0123456789");
    }

    #[test]
    fn test_build_without_kernel() {
        let result = build(&BuildOptions::default());
        assert!(matches!(result, Err(StmgrError::MissingKernel(_))));
    }

    #[test]
    fn test_build_with_unreadable_kernel() {
        let dir = TempDir::new().unwrap();
        let opts = BuildOptions {
            out: Some(dir.path().to_path_buf()),
            kernel: Some(dir.path().join("missing")),
            ..Default::default()
        };
        assert!(matches!(build(&opts), Err(StmgrError::MissingKernel(_))));
    }

    #[test]
    fn test_build_with_missing_initramfs() {
        let dir = TempDir::new().unwrap();
        let opts = BuildOptions {
            out: Some(dir.path().to_path_buf()),
            kernel: Some(write_kernel(dir.path())),
            initramfs: Some(dir.path().join("initrd.img")),
            ..Default::default()
        };
        assert!(matches!(
            build(&opts),
            Err(StmgrError::InputNotFound {
                what: "initramfs",
                ..
            })
        ));
    }

    #[test]
    fn test_explicit_label_and_url() {
        let dir = TempDir::new().unwrap();
        let opts = BuildOptions {
            out: Some(dir.path().join("custom.zip")),
            label: Some("Debian 12".to_string()),
            url: Some("https://os.example.org/custom.zip".to_string()),
            kernel: Some(write_kernel(dir.path())),
            ..Default::default()
        };

        let paths = build(&opts).unwrap();
        assert_eq!(paths.descriptor, dir.path().join("custom.json"));

        let descriptor = Descriptor::load(&paths.descriptor).unwrap();
        assert_eq!(descriptor.label, "Debian 12");
        assert_eq!(
            descriptor.url.as_deref(),
            Some("https://os.example.org/custom.zip")
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        let dir = TempDir::new().unwrap();
        for url in ["ftp://example.org/os.zip", "example.org", "https:///os.zip"] {
            let opts = BuildOptions {
                out: Some(dir.path().to_path_buf()),
                url: Some(url.to_string()),
                kernel: Some(write_kernel(dir.path())),
                ..Default::default()
            };
            assert!(matches!(build(&opts), Err(StmgrError::ParseError(_))));
        }
    }

    #[test]
    fn test_hashes_are_deterministic() {
        let contents = ArchiveContents {
            kernel: b"kernel".to_vec(),
            initramfs: Some(b"initramfs".to_vec()),
            cmdline: "quiet".to_string(),
        };

        let (a, archive_a) = create_package("x".to_string(), None, &contents).unwrap();
        let (b, archive_b) = create_package("x".to_string(), None, &contents).unwrap();

        assert_eq!(a.kernel_hash, b.kernel_hash);
        assert_eq!(a.initramfs_hash, b.initramfs_hash);
        assert_eq!(a.cmdline_hash, b.cmdline_hash);
        assert_eq!(archive_a, archive_b);
    }
}

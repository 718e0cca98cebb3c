//! Human-readable summary of an OS package.

use crate::cert::x509_signing::{issuer_name, subject_name, ValidityWindow};
use crate::error::{Result, StmgrError};
use crate::ospkg::archive::list_entries;
use crate::ospkg::descriptor::Descriptor;
use crate::ospkg::paths::resolve_package;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Describe the package at `package_path` (archive or descriptor).
pub fn describe(package_path: &Path) -> Result<String> {
    let paths = resolve_package(package_path)?;
    let descriptor = Descriptor::load(&paths.descriptor)?;
    let archive = fs::read(&paths.archive)
        .map_err(|_| StmgrError::PackageNotFound(paths.archive.clone()))?;

    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = writeln!(out, "Archive:     {}", paths.archive.display());
    let _ = writeln!(out, "Descriptor:  {}", paths.descriptor.display());
    out.push_str(&describe_descriptor(&descriptor));

    let _ = writeln!(out, "Entries:");
    for entry in list_entries(&archive)? {
        let _ = writeln!(out, "  {:<20} {:>12} bytes", entry.name, entry.size);
    }

    Ok(out)
}

/// Describe the descriptor metadata and signers.
pub fn describe_descriptor(descriptor: &Descriptor) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Version:     {}", descriptor.version);
    let _ = writeln!(out, "Label:       {}", descriptor.label);
    let _ = writeln!(out, "URL:         {}", descriptor.url.as_deref().unwrap_or("-"));
    let _ = writeln!(out, "Cmdline:     {}", descriptor.cmdline);
    let _ = writeln!(out, "Kernel:      sha256:{}", descriptor.kernel_hash);
    match &descriptor.initramfs_hash {
        Some(hash) => {
            let _ = writeln!(out, "Initramfs:   sha256:{}", hash);
        }
        None => {
            let _ = writeln!(out, "Initramfs:   -");
        }
    }
    let _ = writeln!(out, "Signatures:  {}", descriptor.signatures.len());

    for (index, entry) in descriptor.signatures.iter().enumerate() {
        match entry.parse_certificate() {
            Ok(cert) => {
                let _ = writeln!(out, "  [{}] subject: {}", index, subject_name(&cert));
                let _ = writeln!(out, "      issuer:  {}", issuer_name(&cert));
                if let Ok(window) = ValidityWindow::of(&cert) {
                    let _ = writeln!(
                        out,
                        "      valid:   {} .. {}",
                        window.not_before.to_rfc3339(),
                        window.not_after.to_rfc3339()
                    );
                }
            }
            Err(e) => {
                let _ = writeln!(out, "  [{}] unreadable certificate: {}", index, e);
            }
        }
    }

    out
}

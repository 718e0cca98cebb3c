//! Verifying OS packages.
//!
//! Verification has two halves: the archive must match the hashes in the
//! descriptor, and at least `threshold` distinct signers must have signed the
//! descriptor with certificates issued by a trusted root. A bad signature
//! entry is recorded and skipped, never fatal, so the report lists every
//! valid signer.

use crate::cert::chain::validate_chain;
use crate::cert::loader::load_certificates_file;
use crate::cert::x509_signing::{certificate_public_key, subject_name};
use crate::crypto::ed25519::verify_signature;
use crate::crypto::hash::sha256_hex;
use crate::error::{Result, StmgrError};
use crate::ospkg::archive::{read_archive, ArchiveContents};
use crate::ospkg::descriptor::{Descriptor, SignatureEntry};
use crate::ospkg::paths::resolve_package;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use x509_cert::certificate::Certificate;

/// A signature entry that did not count toward the threshold.
#[derive(Debug)]
pub struct SignatureFailure {
    /// Position in the descriptor's signature list.
    pub index: usize,
    pub error: StmgrError,
}

/// Outcome of a signature threshold check.
#[derive(Debug)]
pub struct VerificationReport {
    pub valid: bool,
    pub threshold: usize,
    /// Certificates of the distinct valid signers, in descriptor order.
    pub valid_signers: Vec<Certificate>,
    pub failures: Vec<SignatureFailure>,
}

/// Check every signature of `descriptor` against `trusted_roots` now.
pub fn verify_descriptor(
    descriptor: &Descriptor,
    trusted_roots: &[Certificate],
    threshold: usize,
) -> VerificationReport {
    verify_descriptor_at(descriptor, trusted_roots, threshold, Utc::now())
}

/// Check every signature of `descriptor` against `trusted_roots` at `at`.
///
/// Each signer key counts once, however many entries it has.
pub fn verify_descriptor_at(
    descriptor: &Descriptor,
    trusted_roots: &[Certificate],
    threshold: usize,
    at: DateTime<Utc>,
) -> VerificationReport {
    let payload = descriptor.signed_payload();
    let mut seen_keys: Vec<VerifyingKey> = Vec::new();
    let mut valid_signers = Vec::new();
    let mut failures = Vec::new();

    for (index, entry) in descriptor.signatures.iter().enumerate() {
        let outcome = verify_entry(entry, &payload, trusted_roots, at).and_then(|cert| {
            let key = certificate_public_key(&cert)?;
            if seen_keys.contains(&key) {
                return Err(StmgrError::DuplicateSignature(subject_name(&cert)));
            }
            seen_keys.push(key);
            Ok(cert)
        });

        match outcome {
            Ok(cert) => {
                debug!(index, signer = %subject_name(&cert), "valid signature");
                valid_signers.push(cert);
            }
            Err(error) => {
                warn!(index, %error, "signature rejected");
                failures.push(SignatureFailure { index, error });
            }
        }
    }

    VerificationReport {
        valid: valid_signers.len() >= threshold,
        threshold,
        valid_signers,
        failures,
    }
}

fn verify_entry(
    entry: &SignatureEntry,
    payload: &[u8],
    trusted_roots: &[Certificate],
    at: DateTime<Utc>,
) -> Result<Certificate> {
    let cert = entry.parse_certificate()?;
    validate_chain(&cert, trusted_roots, at)?;

    let signature = Signature::from_slice(&entry.signature)
        .map_err(|e| StmgrError::CryptoError(format!("malformed signature: {}", e)))?;
    verify_signature(&certificate_public_key(&cert)?, payload, &signature)?;

    Ok(cert)
}

/// Compare extracted archive contents with the descriptor's hashes.
pub fn check_archive_contents(descriptor: &Descriptor, contents: &ArchiveContents) -> Result<()> {
    if sha256_hex(&contents.kernel) != descriptor.kernel_hash {
        return Err(StmgrError::ArchiveMismatch(
            "kernel does not match kernel_hash".to_string(),
        ));
    }

    match (&contents.initramfs, &descriptor.initramfs_hash) {
        (Some(initramfs), Some(hash)) if sha256_hex(initramfs) == *hash => {}
        (None, None) => {}
        (Some(_), Some(_)) => {
            return Err(StmgrError::ArchiveMismatch(
                "initramfs does not match initramfs_hash".to_string(),
            ))
        }
        (Some(_), None) => {
            return Err(StmgrError::ArchiveMismatch(
                "archive carries an initramfs the descriptor does not list".to_string(),
            ))
        }
        (None, Some(_)) => {
            return Err(StmgrError::ArchiveMismatch(
                "archive lacks the initramfs listed in the descriptor".to_string(),
            ))
        }
    }

    if sha256_hex(contents.cmdline.as_bytes()) != descriptor.cmdline_hash {
        return Err(StmgrError::ArchiveMismatch(
            "command line does not match cmdline_hash".to_string(),
        ));
    }

    Ok(())
}

/// Re-hash an archive and compare it with the descriptor.
pub fn verify_archive(descriptor: &Descriptor, archive: &[u8]) -> Result<()> {
    check_archive_contents(descriptor, &read_archive(archive)?)
}

/// Load trusted root certificates from PEM files.
pub fn load_trust_pool(paths: &[PathBuf]) -> Result<Vec<Certificate>> {
    let mut roots = Vec::new();
    for path in paths {
        roots.extend(load_certificates_file(path)?);
    }
    Ok(roots)
}

/// Verify an OS package on disk: archive integrity, then signatures.
///
/// A tampered archive is an error; an unmet threshold is reported through
/// [`VerificationReport::valid`].
pub fn verify_package(
    package_path: &Path,
    trusted_roots: &[Certificate],
    threshold: usize,
) -> Result<VerificationReport> {
    let paths = resolve_package(package_path)?;
    let descriptor = Descriptor::load(&paths.descriptor)?;
    let archive = fs::read(&paths.archive)
        .map_err(|_| StmgrError::PackageNotFound(paths.archive.clone()))?;

    verify_archive(&descriptor, &archive)?;
    let report = verify_descriptor(&descriptor, trusted_roots, threshold);

    info!(
        package = %paths.descriptor.display(),
        valid_signers = report.valid_signers.len(),
        threshold,
        valid = report.valid,
        "verified OS package"
    );

    Ok(report)
}

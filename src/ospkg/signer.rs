//! Signing OS packages.
//!
//! A signature covers the descriptor's signed payload and is appended to the
//! descriptor together with the signer's certificate. The archive is never
//! modified. Concurrent signers of the same package must be serialized by the
//! caller; the descriptor is replaced as a whole, so the last writer wins.

use crate::cert::loader::{load_certificate_file, load_private_key_file};
use crate::cert::x509_signing::{cert_to_der, cert_to_pem, certificate_public_key, subject_name};
use crate::crypto::ed25519::{verify_signature, Keypair};
use crate::error::{Result, StmgrError};
use crate::ospkg::archive::read_archive;
use crate::ospkg::descriptor::{Descriptor, SignatureEntry, MAX_SIGNATURES};
use crate::ospkg::paths::resolve_package;
use crate::ospkg::verifier::check_archive_contents;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use x509_cert::certificate::Certificate;

const PROBE_MESSAGE: &[u8] = b"stmgr key/certificate probe";

/// Sign the package at `package_path` (archive or descriptor) and return the
/// path of the updated descriptor.
pub fn sign(key_path: &Path, cert_path: &Path, package_path: &Path) -> Result<PathBuf> {
    let paths = resolve_package(package_path)?;
    let mut descriptor = Descriptor::load(&paths.descriptor)?;
    let archive = fs::read(&paths.archive)
        .map_err(|_| StmgrError::PackageNotFound(paths.archive.clone()))?;

    let keypair = load_private_key_file(key_path)?;
    let cert = load_certificate_file(cert_path)?;

    // Refuse to vouch for an archive the descriptor does not describe
    check_archive_contents(&descriptor, &read_archive(&archive)?)?;

    sign_descriptor(&mut descriptor, &keypair, &cert)?;
    descriptor.save(&paths.descriptor)?;

    info!(
        descriptor = %paths.descriptor.display(),
        signer = %subject_name(&cert),
        fingerprint = %keypair.fingerprint(),
        signatures = descriptor.signatures.len(),
        "signed OS package"
    );

    Ok(paths.descriptor)
}

/// Append a signature by `keypair`/`cert` to `descriptor`.
///
/// On error the descriptor is left unchanged.
pub fn sign_descriptor(
    descriptor: &mut Descriptor,
    keypair: &Keypair,
    cert: &Certificate,
) -> Result<()> {
    check_key_matches_certificate(keypair, cert)?;

    if descriptor.signatures.len() >= MAX_SIGNATURES {
        return Err(StmgrError::SignatureLimitExceeded(descriptor.signatures.len()));
    }

    let cert_der = cert_to_der(cert)?;
    if descriptor
        .signatures
        .iter()
        .any(|entry| same_signer(entry, &cert_der, keypair))
    {
        return Err(StmgrError::DuplicateSignature(subject_name(cert)));
    }

    let signature = keypair.sign(&descriptor.signed_payload());
    descriptor.signatures.push(SignatureEntry {
        certificate: cert_to_pem(cert)?,
        signature: signature.to_bytes().to_vec(),
    });

    Ok(())
}

/// Probe that the certificate's public key verifies a signature made with the key.
fn check_key_matches_certificate(keypair: &Keypair, cert: &Certificate) -> Result<()> {
    let cert_key = certificate_public_key(cert)?;
    let probe = keypair.sign(PROBE_MESSAGE);
    verify_signature(&cert_key, PROBE_MESSAGE, &probe).map_err(|_| StmgrError::KeyCertMismatch)
}

/// An existing entry counts as the same signer when it carries the same
/// certificate or a certificate for the same key.
fn same_signer(entry: &SignatureEntry, cert_der: &[u8], keypair: &Keypair) -> bool {
    let Ok(existing) = entry.parse_certificate() else {
        return false;
    };

    let same_cert = cert_to_der(&existing)
        .map(|der| der == cert_der)
        .unwrap_or(false);
    let same_key = certificate_public_key(&existing)
        .map(|key| key == keypair.public)
        .unwrap_or(false);

    same_cert || same_key
}

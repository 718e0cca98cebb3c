//! Loading certificates and private keys from PEM files.
//!
//! Files are read to completion before anything is parsed; missing files map
//! to [`StmgrError::InputNotFound`] so the caller sees which input was absent.

use crate::cert::x509_signing::cert_from_pem;
use crate::crypto::ed25519::{import_ed25519_from_pem, Keypair};
use crate::error::{Result, StmgrError};
use crate::fsutil::read_input;
use std::path::Path;
use x509_cert::certificate::Certificate;
use zeroize::Zeroizing;

fn read_input_string(what: &'static str, path: &Path) -> Result<String> {
    let bytes = read_input(what, path)?;
    String::from_utf8(bytes)
        .map_err(|_| StmgrError::PemError(format!("{} is not valid UTF-8", path.display())))
}

/// Load a single certificate from a PEM file.
pub fn load_certificate_file(path: &Path) -> Result<Certificate> {
    let pem = read_input_string("certificate", path)?;
    cert_from_pem(&pem)
}

/// Load every certificate contained in a PEM file.
///
/// Non-certificate PEM blocks are skipped. At least one certificate is required.
pub fn load_certificates_from_pem(pem_str: &str) -> Result<Vec<Certificate>> {
    let blocks = pem::parse_many(pem_str)
        .map_err(|e| StmgrError::PemError(format!("Failed to read PEM: {}", e)))?;

    let certificates = blocks
        .iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| cert_from_pem(&pem::encode(block)))
        .collect::<Result<Vec<_>>>()?;

    if certificates.is_empty() {
        return Err(StmgrError::PemError(
            "No certificates found in PEM file".to_string(),
        ));
    }

    Ok(certificates)
}

/// Load every certificate contained in a PEM file on disk.
pub fn load_certificates_file(path: &Path) -> Result<Vec<Certificate>> {
    let pem = read_input_string("certificate", path)?;
    load_certificates_from_pem(&pem)
}

/// Load an Ed25519 private key from a PKCS#8 PEM file.
///
/// The raw file contents are zeroized once the key has been parsed.
pub fn load_private_key_file(path: &Path) -> Result<Keypair> {
    let pem = Zeroizing::new(read_input_string("private key", path)?);
    import_ed25519_from_pem(&pem)
}

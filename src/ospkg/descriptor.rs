//! The OS package descriptor.
//!
//! The descriptor is a JSON document stored next to the archive. It carries
//! the package metadata, the SHA-256 hashes of the archived inputs and the
//! list of signatures. Signatures cover [`Descriptor::signed_payload`], a
//! fixed-order binary encoding of every field except the signature list.

use crate::cert::x509_signing::cert_from_pem;
use crate::crypto::hash::sha256_hex;
use crate::error::{Result, StmgrError};
use crate::fsutil::{write_atomic, PUBLIC_FILE_MODE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use x509_cert::certificate::Certificate;

/// Current descriptor format version.
pub const DESCRIPTOR_VERSION: u32 = 1;

/// Upper bound on the number of signatures a descriptor may carry.
pub const MAX_SIGNATURES: usize = 8;

/// Prefix of the signed payload, binding signatures to this format.
const PAYLOAD_DOMAIN: &[u8] = b"stmgr-ospkg-v1\0";

/// One signature over the descriptor's signed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    /// PEM-encoded signing certificate.
    pub certificate: String,
    /// Raw Ed25519 signature, base64 in JSON.
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

impl SignatureEntry {
    pub fn parse_certificate(&self) -> Result<Certificate> {
        cert_from_pem(&self.certificate)
    }
}

/// Metadata and signatures bound to an OS package archive.
///
/// Field order here is the on-disk order; the signed payload does not depend
/// on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Descriptor {
    pub version: u32,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub cmdline: String,
    pub kernel_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initramfs_hash: Option<String>,
    pub cmdline_hash: String,
    #[serde(default)]
    pub signatures: Vec<SignatureEntry>,
}

impl Descriptor {
    /// The canonical bytes covered by every signature.
    ///
    /// Layout: domain prefix, `version` as u32 big-endian, then `label`, `url`,
    /// `cmdline`, `kernel_hash`, `initramfs_hash` and `cmdline_hash`, each as a
    /// u64 big-endian length followed by the UTF-8 bytes. Absent optional
    /// fields encode as zero length.
    pub fn signed_payload(&self) -> Vec<u8> {
        let fields: [&str; 6] = [
            &self.label,
            self.url.as_deref().unwrap_or(""),
            &self.cmdline,
            &self.kernel_hash,
            self.initramfs_hash.as_deref().unwrap_or(""),
            &self.cmdline_hash,
        ];

        let capacity = PAYLOAD_DOMAIN.len() + 4 + fields.iter().map(|f| 8 + f.len()).sum::<usize>();
        let mut payload = Vec::with_capacity(capacity);
        payload.extend_from_slice(PAYLOAD_DOMAIN);
        payload.extend_from_slice(&self.version.to_be_bytes());
        for field in fields {
            payload.extend_from_slice(&(field.len() as u64).to_be_bytes());
            payload.extend_from_slice(field.as_bytes());
        }
        payload
    }

    /// Check structural invariants of a parsed descriptor.
    pub fn validate(&self) -> Result<()> {
        if self.version != DESCRIPTOR_VERSION {
            return Err(StmgrError::MalformedDescriptor(format!(
                "unsupported version {}, expected {}",
                self.version, DESCRIPTOR_VERSION
            )));
        }

        check_hash("kernel_hash", &self.kernel_hash)?;
        if let Some(hash) = &self.initramfs_hash {
            check_hash("initramfs_hash", hash)?;
        }
        check_hash("cmdline_hash", &self.cmdline_hash)?;

        if sha256_hex(self.cmdline.as_bytes()) != self.cmdline_hash {
            return Err(StmgrError::MalformedDescriptor(
                "cmdline_hash does not match cmdline".to_string(),
            ));
        }

        if self.signatures.len() > MAX_SIGNATURES {
            return Err(StmgrError::MalformedDescriptor(format!(
                "{} signatures exceed the limit of {}",
                self.signatures.len(),
                MAX_SIGNATURES
            )));
        }

        Ok(())
    }

    /// Parse and validate a descriptor from JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let descriptor: Descriptor = serde_json::from_slice(bytes)
            .map_err(|e| StmgrError::MalformedDescriptor(e.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        let mut json = serde_json::to_vec_pretty(self)?;
        json.push(b'\n');
        Ok(json)
    }

    /// Load a descriptor file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StmgrError::PackageNotFound(path.to_path_buf()),
            _ => StmgrError::IoError(e),
        })?;
        Self::from_json(&bytes)
    }

    /// Replace the descriptor file as a whole.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_json()?, PUBLIC_FILE_MODE)
    }
}

fn check_hash(name: &str, value: &str) -> Result<()> {
    let well_formed = value.len() == 64
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if well_formed {
        Ok(())
    } else {
        Err(StmgrError::MalformedDescriptor(format!(
            "{} is not a lowercase hex SHA-256 digest",
            name
        )))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

//! Error types for stmgr.
//!
//! Every failure in this crate is deterministic given its inputs, so none of
//! these errors are retried. The CLI reports them prefixed with `ERROR:`.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for stmgr operations.
#[derive(Error, Debug)]
pub enum StmgrError {
    /// A required input file (initramfs, key, certificate, ...) is missing or unreadable
    #[error("{what} not found: {}", path.display())]
    InputNotFound { what: &'static str, path: PathBuf },

    /// The kernel was not given or cannot be read
    #[error("kernel not found: {0}")]
    MissingKernel(String),

    /// One half of an OS package (archive or descriptor) is missing
    #[error("OS package not found: {}", .0.display())]
    PackageNotFound(PathBuf),

    /// The certificate validity window is empty or inverted
    #[error("invalid date range: valid until {until} is not after valid from {from}")]
    InvalidDateRange { from: String, until: String },

    /// A leaf certificate was requested without usable root key/certificate
    #[error("missing root material: {0}")]
    MissingRootMaterial(String),

    /// The certificate does not belong to the private key
    #[error("certificate public key does not match the private key")]
    KeyCertMismatch,

    /// The descriptor already carries the maximum number of signatures
    #[error("signature limit exceeded: descriptor already holds {0} signatures")]
    SignatureLimitExceeded(usize),

    /// The descriptor already carries a signature by this certificate
    #[error("duplicate signature: package is already signed by {0}")]
    DuplicateSignature(String),

    /// The descriptor is unparsable or lacks required fields
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    /// The archive contents do not match the hashes stored in the descriptor
    #[error("archive mismatch: {0}")]
    ArchiveMismatch(String),

    /// No trusted root issued the certificate
    #[error("chain validation failure: {0}")]
    ChainValidationFailure(String),

    /// The verification instant lies outside a certificate's validity window
    #[error("certificate not valid at {at}: {subject}")]
    ExpiredCertificate { subject: String, at: String },

    /// The number of valid signers is below the required threshold
    #[error("signature threshold not met: {valid} valid of {required} required")]
    ThresholdNotMet { valid: usize, required: usize },

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Invalid key format or content
    #[error("Invalid key: {0}")]
    InvalidKeyError(String),

    /// Certificate generation or decoding error
    #[error("Certificate error: {0}")]
    CertificateError(String),

    /// PEM encoding/decoding error
    #[error("PEM error: {0}")]
    PemError(String),

    /// Invalid input data
    #[error("Parse error: {0}")]
    ParseError(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// ZIP archive error
    #[error("Archive error: {0}")]
    ArchiveError(#[from] zip::result::ZipError),
}

/// A specialized Result type for stmgr operations.
pub type Result<T> = std::result::Result<T, StmgrError>;

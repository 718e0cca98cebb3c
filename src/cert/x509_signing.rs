//! X.509 certificate signing using x509-cert.
//!
//! Root certificates are self-signed; signing certificates are issued directly
//! by a root. All certificates carry Ed25519 keys and Ed25519 signatures.

use crate::crypto::ed25519::Keypair;
use crate::error::{Result, StmgrError};
use chrono::{DateTime, Utc};
use der::asn1::{BitString, GeneralizedTime, OctetString, UtcTime, Utf8StringRef};
use der::{Decode, Encode};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use std::time::Duration;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::certificate::Certificate;
use x509_cert::ext::pkix::BasicConstraints;
use x509_cert::ext::Extension;
use x509_cert::name::{RdnSequence, RelativeDistinguishedName};
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};
use x509_cert::TbsCertificate;

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// A certificate validity window `[not_before, not_after)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl ValidityWindow {
    /// Build a window, rejecting `not_after <= not_before`.
    pub fn new(not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Result<Self> {
        if not_after <= not_before {
            return Err(StmgrError::InvalidDateRange {
                from: not_before.to_rfc2822(),
                until: not_after.to_rfc2822(),
            });
        }
        Ok(Self {
            not_before,
            not_after,
        })
    }

    /// Read the window stored in a certificate.
    pub fn of(cert: &Certificate) -> Result<Self> {
        let validity = &cert.tbs_certificate.validity;
        Ok(Self {
            not_before: from_x509_time(&validity.not_before)?,
            not_after: from_x509_time(&validity.not_after)?,
        })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at < self.not_after
    }
}

/// Create a self-signed root certificate.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use stmgr::cert::x509_signing::{create_self_signed_ca, ValidityWindow};
/// use stmgr::crypto::ed25519::generate_ed25519_keypair;
///
/// # fn example() -> stmgr::error::Result<()> {
/// let keypair = generate_ed25519_keypair()?;
/// let now = Utc::now();
/// let window = ValidityWindow::new(now, now + Duration::hours(72))?;
/// let cert = create_self_signed_ca(&keypair, "Root CA", window)?;
/// assert_eq!(cert.tbs_certificate.issuer, cert.tbs_certificate.subject);
/// # Ok(())
/// # }
/// ```
pub fn create_self_signed_ca(
    keypair: &Keypair,
    subject_cn: &str,
    validity: ValidityWindow,
) -> Result<Certificate> {
    let subject = create_rdn_sequence(subject_cn)?;
    let issuer = subject.clone();
    let extensions = vec![basic_constraints_extension(true)?];

    build_certificate(
        subject,
        issuer,
        &keypair.public,
        &keypair.secret,
        validity,
        extensions,
    )
}

/// Issue a certificate for `subject_keypair`, signed by a root.
///
/// The root key must belong to the root certificate, otherwise
/// [`StmgrError::KeyCertMismatch`] is returned.
pub fn sign_certificate(
    subject_keypair: &Keypair,
    subject_cn: &str,
    ca_keypair: &Keypair,
    ca_cert: &Certificate,
    validity: ValidityWindow,
) -> Result<Certificate> {
    let ca_public = certificate_public_key(ca_cert)?;
    if ca_public != ca_keypair.public {
        return Err(StmgrError::KeyCertMismatch);
    }

    let subject = create_rdn_sequence(subject_cn)?;
    let issuer = ca_cert.tbs_certificate.subject.clone();
    let extensions = vec![basic_constraints_extension(false)?];

    // Sign with the CA's key, not the subject's
    build_certificate(
        subject,
        issuer,
        &subject_keypair.public,
        &ca_keypair.secret,
        validity,
        extensions,
    )
}

/// Extract the Ed25519 public key from a certificate.
pub fn certificate_public_key(cert: &Certificate) -> Result<VerifyingKey> {
    let spki = &cert.tbs_certificate.subject_public_key_info;
    if spki.algorithm.oid != const_oid::db::rfc8410::ID_ED_25519 {
        return Err(StmgrError::CertificateError(format!(
            "unsupported public key algorithm {}",
            spki.algorithm.oid
        )));
    }

    let bytes: [u8; 32] = spki
        .subject_public_key
        .raw_bytes()
        .try_into()
        .map_err(|_| StmgrError::CertificateError("Ed25519 key is not 32 bytes".to_string()))?;

    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| StmgrError::CertificateError(format!("Invalid Ed25519 key: {}", e)))
}

/// Human-readable subject of a certificate.
pub fn subject_name(cert: &Certificate) -> String {
    cert.tbs_certificate.subject.to_string()
}

/// Human-readable issuer of a certificate.
pub fn issuer_name(cert: &Certificate) -> String {
    cert.tbs_certificate.issuer.to_string()
}

/// Convert a Certificate to PEM format.
pub fn cert_to_pem(cert: &Certificate) -> Result<String> {
    let der = cert_to_der(cert)?;
    Ok(pem::encode(&pem::Pem::new(CERTIFICATE_TAG, der)))
}

/// DER encoding of a certificate.
pub fn cert_to_der(cert: &Certificate) -> Result<Vec<u8>> {
    cert.to_der()
        .map_err(|e| StmgrError::CertificateError(format!("Failed to encode certificate: {}", e)))
}

/// Load a Certificate from PEM format.
pub fn cert_from_pem(pem_str: &str) -> Result<Certificate> {
    let pem = pem::parse(pem_str)
        .map_err(|e| StmgrError::PemError(format!("Failed to parse PEM: {}", e)))?;

    if pem.tag() != CERTIFICATE_TAG {
        return Err(StmgrError::PemError(format!(
            "Expected {}, got {}",
            CERTIFICATE_TAG,
            pem.tag()
        )));
    }

    Certificate::from_der(pem.contents())
        .map_err(|e| StmgrError::CertificateError(format!("Failed to decode certificate: {}", e)))
}

/// Whether the certificate carries `basicConstraints` with `cA` set.
pub fn is_ca(cert: &Certificate) -> bool {
    cert.tbs_certificate
        .extensions
        .iter()
        .flatten()
        .filter(|ext| ext.extn_id == const_oid::db::rfc5280::ID_CE_BASIC_CONSTRAINTS)
        .filter_map(|ext| BasicConstraints::from_der(ext.extn_value.as_bytes()).ok())
        .any(|bc| bc.ca)
}

// Helper functions

fn build_certificate(
    subject: RdnSequence,
    issuer: RdnSequence,
    subject_key: &VerifyingKey,
    signing_key: &SigningKey,
    validity: ValidityWindow,
    extensions: Vec<Extension>,
) -> Result<Certificate> {
    let signature_algorithm = ed25519_algorithm();

    let tbs = TbsCertificate {
        version: x509_cert::certificate::Version::V3,
        serial_number: generate_serial_number()?,
        signature: signature_algorithm.clone(),
        issuer,
        validity: Validity {
            not_before: to_x509_time(validity.not_before)?,
            not_after: to_x509_time(validity.not_after)?,
        },
        subject,
        subject_public_key_info: create_subject_public_key_info(subject_key)?,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(extensions),
    };

    let signature = sign_tbs(&tbs, signing_key)?;

    Ok(Certificate {
        tbs_certificate: tbs,
        signature_algorithm,
        signature,
    })
}

fn generate_serial_number() -> Result<SerialNumber> {
    let mut bytes = [0u8; 20];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    bytes[0] &= 0x7F; // Ensure positive
    bytes[0] |= 0x01; // and without a redundant leading zero

    SerialNumber::new(&bytes)
        .map_err(|e| StmgrError::CertificateError(format!("Failed to create serial number: {}", e)))
}

fn create_rdn_sequence(cn: &str) -> Result<RdnSequence> {
    let cn_only = cn
        .strip_prefix("CN=")
        .and_then(|rest| rest.split(',').next())
        .unwrap_or(cn);

    if cn_only.trim().is_empty() {
        return Err(StmgrError::ParseError("Subject cannot be empty".to_string()));
    }

    let cn_attr = AttributeTypeAndValue {
        oid: const_oid::db::rfc4519::CN,
        value: Utf8StringRef::new(cn_only)
            .map_err(|e| StmgrError::ParseError(format!("Invalid CN: {}", e)))?
            .into(),
    };

    let mut attr_set = der::asn1::SetOfVec::new();
    attr_set
        .insert_ordered(cn_attr)
        .map_err(|e| StmgrError::CertificateError(format!("Failed to add attribute: {}", e)))?;

    Ok(RdnSequence(vec![RelativeDistinguishedName::from(attr_set)]))
}

fn basic_constraints_extension(ca: bool) -> Result<Extension> {
    let constraints = BasicConstraints {
        ca,
        path_len_constraint: if ca { Some(0) } else { None },
    };
    let value = constraints
        .to_der()
        .and_then(OctetString::new)
        .map_err(|e| StmgrError::CertificateError(format!("Failed to encode extension: {}", e)))?;

    Ok(Extension {
        extn_id: const_oid::db::rfc5280::ID_CE_BASIC_CONSTRAINTS,
        critical: true,
        extn_value: value,
    })
}

/// RFC 5280: UTCTime through 2049, GeneralizedTime from 2050 on.
fn to_x509_time(at: DateTime<Utc>) -> Result<Time> {
    let secs = u64::try_from(at.timestamp()).map_err(|_| {
        StmgrError::CertificateError(format!("Time before 1970 not supported: {}", at))
    })?;
    let date_time = der::DateTime::from_unix_duration(Duration::from_secs(secs))
        .map_err(|e| StmgrError::CertificateError(format!("Invalid time {}: {}", at, e)))?;

    if date_time.year() < 2050 {
        let utc = UtcTime::from_date_time(date_time)
            .map_err(|e| StmgrError::CertificateError(format!("Invalid time {}: {}", at, e)))?;
        Ok(Time::UtcTime(utc))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_date_time(date_time)))
    }
}

fn from_x509_time(time: &Time) -> Result<DateTime<Utc>> {
    let secs = time.to_unix_duration().as_secs();
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .ok_or_else(|| StmgrError::CertificateError(format!("Time out of range: {}", secs)))
}

fn create_subject_public_key_info(public_key: &VerifyingKey) -> Result<SubjectPublicKeyInfoOwned> {
    let subject_public_key = BitString::from_bytes(&public_key.to_bytes())
        .map_err(|e| StmgrError::CertificateError(format!("Failed to create bit string: {}", e)))?;

    Ok(SubjectPublicKeyInfoOwned {
        algorithm: ed25519_algorithm(),
        subject_public_key,
    })
}

fn ed25519_algorithm() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: const_oid::db::rfc8410::ID_ED_25519,
        parameters: None,
    }
}

fn sign_tbs(tbs: &TbsCertificate, signing_key: &SigningKey) -> Result<BitString> {
    let tbs_der = tbs
        .to_der()
        .map_err(|e| StmgrError::CertificateError(format!("Failed to encode TBS: {}", e)))?;

    let signature = signing_key.sign(&tbs_der);

    BitString::from_bytes(&signature.to_bytes()).map_err(|e| {
        StmgrError::CertificateError(format!("Failed to create signature bitstring: {}", e))
    })
}

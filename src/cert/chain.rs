//! Certificate chain checks used by the verifier.
//!
//! A signing certificate is trusted when a certificate from the trust pool
//! issued it (subject/issuer names match and the root's key verifies the
//! certificate signature) and both are valid at the verification instant.

use crate::cert::x509_signing::{certificate_public_key, subject_name, ValidityWindow};
use crate::crypto::ed25519::verify_signature;
use crate::error::{Result, StmgrError};
use chrono::{DateTime, Utc};
use der::Encode;
use ed25519_dalek::Signature;
use x509_cert::certificate::Certificate;

/// Check that `issuer` signed `cert`.
pub fn verify_issued_by(cert: &Certificate, issuer: &Certificate) -> Result<()> {
    if cert.tbs_certificate.issuer != issuer.tbs_certificate.subject {
        return Err(StmgrError::ChainValidationFailure(format!(
            "{} was not issued by {}",
            subject_name(cert),
            subject_name(issuer)
        )));
    }

    if cert.signature_algorithm.oid != const_oid::db::rfc8410::ID_ED_25519 {
        return Err(StmgrError::ChainValidationFailure(format!(
            "unsupported signature algorithm {}",
            cert.signature_algorithm.oid
        )));
    }

    let tbs = cert
        .tbs_certificate
        .to_der()
        .map_err(|e| StmgrError::CertificateError(format!("Failed to encode TBS: {}", e)))?;
    let signature = Signature::from_slice(cert.signature.raw_bytes())
        .map_err(|e| StmgrError::ChainValidationFailure(format!("bad signature: {}", e)))?;
    let issuer_key = certificate_public_key(issuer)?;

    verify_signature(&issuer_key, &tbs, &signature).map_err(|_| {
        StmgrError::ChainValidationFailure(format!(
            "signature of {} does not verify under {}",
            subject_name(cert),
            subject_name(issuer)
        ))
    })
}

/// Check that `at` lies within the certificate's validity window.
pub fn check_validity_at(cert: &Certificate, at: DateTime<Utc>) -> Result<()> {
    if ValidityWindow::of(cert)?.contains(at) {
        Ok(())
    } else {
        Err(StmgrError::ExpiredCertificate {
            subject: subject_name(cert),
            at: at.to_rfc3339(),
        })
    }
}

/// Find the trusted root that issued `cert` and is itself valid at `at`.
///
/// Roots that match by name but fail the signature or validity check are
/// skipped, so several roots may share a subject.
pub fn find_trusted_issuer<'a>(
    cert: &Certificate,
    trusted_roots: &'a [Certificate],
    at: DateTime<Utc>,
) -> Result<&'a Certificate> {
    let mut last_error = None;

    for root in trusted_roots {
        match verify_issued_by(cert, root).and_then(|()| check_validity_at(root, at)) {
            Ok(()) => return Ok(root),
            Err(e) => last_error = Some(e),
        }
    }

    Err(match last_error {
        Some(e @ StmgrError::ExpiredCertificate { .. }) => e,
        _ => StmgrError::ChainValidationFailure(format!(
            "no trusted root issued {}",
            subject_name(cert)
        )),
    })
}

/// Validate a signing certificate against the trust pool at `at`.
pub fn validate_chain<'a>(
    cert: &Certificate,
    trusted_roots: &'a [Certificate],
    at: DateTime<Utc>,
) -> Result<&'a Certificate> {
    check_validity_at(cert, at)?;
    find_trusted_issuer(cert, trusted_roots, at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::x509_signing::{create_self_signed_ca, sign_certificate};
    use crate::crypto::ed25519::{generate_ed25519_keypair, Keypair};
    use chrono::Duration;

    fn window_from(start: DateTime<Utc>, hours: i64) -> ValidityWindow {
        ValidityWindow::new(start, start + Duration::hours(hours)).unwrap()
    }

    fn root(cn: &str) -> (Keypair, Certificate) {
        let keypair = generate_ed25519_keypair().unwrap();
        let cert = create_self_signed_ca(&keypair, cn, window_from(Utc::now(), 48)).unwrap();
        (keypair, cert)
    }

    fn leaf(root_key: &Keypair, root_cert: &Certificate, window: ValidityWindow) -> Certificate {
        let keypair = generate_ed25519_keypair().unwrap();
        sign_certificate(&keypair, "Signer", root_key, root_cert, window).unwrap()
    }

    #[test]
    fn test_leaf_chains_to_its_root() {
        let (root_key, root_cert) = root("Root");
        let cert = leaf(&root_key, &root_cert, window_from(Utc::now(), 24));

        assert!(verify_issued_by(&cert, &root_cert).is_ok());
        let found = validate_chain(&cert, std::slice::from_ref(&root_cert), Utc::now()).unwrap();
        assert_eq!(found, &root_cert);
    }

    #[test]
    fn test_root_verifies_itself() {
        let (_, root_cert) = root("Root");
        assert!(verify_issued_by(&root_cert, &root_cert).is_ok());
    }

    #[test]
    fn test_impostor_root_with_same_name_is_rejected() {
        let (root_key, root_cert) = root("Root");
        let (_, impostor) = root("Root");
        let cert = leaf(&root_key, &root_cert, window_from(Utc::now(), 24));

        let result = verify_issued_by(&cert, &impostor);
        assert!(matches!(result, Err(StmgrError::ChainValidationFailure(_))));

        // The real root is still found further down the pool
        let pool = vec![impostor, root_cert.clone()];
        assert_eq!(validate_chain(&cert, &pool, Utc::now()).unwrap(), &root_cert);
    }

    #[test]
    fn test_unknown_root() {
        let (root_key, root_cert) = root("Root");
        let (_, other) = root("Other");
        let cert = leaf(&root_key, &root_cert, window_from(Utc::now(), 24));

        let roots = [other];
        let result = validate_chain(&cert, &roots, Utc::now());
        assert!(matches!(result, Err(StmgrError::ChainValidationFailure(_))));
    }

    #[test]
    fn test_expired_leaf() {
        let (root_key, root_cert) = root("Root");
        let cert = leaf(
            &root_key,
            &root_cert,
            window_from(Utc::now() - Duration::hours(10), 2),
        );

        let roots = [root_cert];
        let result = validate_chain(&cert, &roots, Utc::now());
        assert!(matches!(result, Err(StmgrError::ExpiredCertificate { .. })));
    }

    #[test]
    fn test_not_yet_valid_leaf() {
        let (root_key, root_cert) = root("Root");
        let cert = leaf(
            &root_key,
            &root_cert,
            window_from(Utc::now() + Duration::hours(10), 2),
        );

        assert!(check_validity_at(&cert, Utc::now()).is_err());
        assert!(check_validity_at(&cert, Utc::now() + Duration::hours(11)).is_ok());
    }

    #[test]
    fn test_expired_root() {
        let root_key = generate_ed25519_keypair().unwrap();
        let root_cert = create_self_signed_ca(
            &root_key,
            "Old Root",
            window_from(Utc::now() - Duration::hours(5), 1),
        )
        .unwrap();
        let cert = leaf(&root_key, &root_cert, window_from(Utc::now(), 2));

        let roots = [root_cert];
        let result = validate_chain(&cert, &roots, Utc::now());
        assert!(matches!(result, Err(StmgrError::ExpiredCertificate { .. })));
    }
}

//! Certificate issuance.
//!
//! Generates an Ed25519 key pair and either a self-signed root certificate or
//! a signing certificate issued by an existing root, then writes the
//! certificate and private key as PEM files.

use crate::cert::loader::{load_certificate_file, load_private_key_file};
use crate::cert::x509_signing::{
    cert_to_pem, create_self_signed_ca, sign_certificate, ValidityWindow,
};
use crate::crypto::ed25519::generate_ed25519_keypair;
use crate::error::{Result, StmgrError};
use crate::fsutil::write_private;
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default lifetime of a certificate when no end date is given.
pub const DEFAULT_VALIDITY_HOURS: i64 = 72;

pub const DEFAULT_ROOT_CERT: &str = "rootcert.pem";
pub const DEFAULT_ROOT_KEY: &str = "rootkey.pem";
pub const DEFAULT_CERT: &str = "cert.pem";
pub const DEFAULT_KEY: &str = "key.pem";

const ROOT_SUBJECT: &str = "System Transparency Root";
const SIGNER_SUBJECT: &str = "System Transparency Signing Key";

/// Inputs of a certificate issuance.
#[derive(Debug, Clone, Default)]
pub struct IssueOptions {
    /// Generate a self-signed root instead of a signing certificate.
    pub is_ca: bool,
    /// Root certificate, required unless `is_ca`.
    pub root_cert: Option<PathBuf>,
    /// Root private key, required unless `is_ca`.
    pub root_key: Option<PathBuf>,
    /// RFC 822 start of validity, defaults to now.
    pub valid_from: Option<String>,
    /// RFC 822 end of validity, defaults to now + 72h.
    pub valid_until: Option<String>,
    pub cert_out: Option<PathBuf>,
    pub key_out: Option<PathBuf>,
}

/// Paths of the files written by [`issue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedFiles {
    pub certificate: PathBuf,
    pub key: PathBuf,
}

/// Issue a certificate and write it together with its private key.
///
/// Root material is never read when `is_ca` is set.
pub fn issue(opts: &IssueOptions) -> Result<IssuedFiles> {
    issue_at(opts, Utc::now())
}

/// Like [`issue`], with an explicit "now" for the validity defaults.
pub fn issue_at(opts: &IssueOptions, now: DateTime<Utc>) -> Result<IssuedFiles> {
    let validity = resolve_validity(opts, now)?;
    let (cert_out, key_out) = output_paths(opts);

    let keypair = generate_ed25519_keypair()?;

    let cert = if opts.is_ca {
        create_self_signed_ca(&keypair, ROOT_SUBJECT, validity)?
    } else {
        let (root_cert_path, root_key_path) = match (&opts.root_cert, &opts.root_key) {
            (Some(cert), Some(key)) => (cert, key),
            (None, _) => {
                return Err(StmgrError::MissingRootMaterial(
                    "root certificate is required unless issuing a root".to_string(),
                ))
            }
            (_, None) => {
                return Err(StmgrError::MissingRootMaterial(
                    "root key is required unless issuing a root".to_string(),
                ))
            }
        };

        let root_cert = load_root(root_cert_path, load_certificate_file)?;
        let root_key = load_root(root_key_path, load_private_key_file)?;

        sign_certificate(&keypair, SIGNER_SUBJECT, &root_key, &root_cert, validity)?
    };

    // Key first; a certificate is never left behind without its key
    let cert_pem = cert_to_pem(&cert)?;
    write_private(&key_out, keypair.to_pkcs8_pem().as_bytes())?;
    if let Err(e) = write_private(&cert_out, cert_pem.as_bytes()) {
        let _ = fs::remove_file(&key_out);
        return Err(e);
    }

    info!(
        certificate = %cert_out.display(),
        key = %key_out.display(),
        is_ca = opts.is_ca,
        fingerprint = %keypair.fingerprint(),
        not_before = %validity.not_before,
        not_after = %validity.not_after,
        "issued certificate"
    );

    Ok(IssuedFiles {
        certificate: cert_out,
        key: key_out,
    })
}

fn load_root<T>(path: &Path, load: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
    load(path).map_err(|e| {
        StmgrError::MissingRootMaterial(format!("cannot use {}: {}", path.display(), e))
    })
}

fn resolve_validity(opts: &IssueOptions, now: DateTime<Utc>) -> Result<ValidityWindow> {
    let not_before = match non_empty(&opts.valid_from) {
        Some(s) => parse_rfc822(s)?,
        None => now,
    };
    let not_after = match non_empty(&opts.valid_until) {
        Some(s) => parse_rfc822(s)?,
        None => now + Duration::hours(DEFAULT_VALIDITY_HOURS),
    };

    ValidityWindow::new(not_before, not_after)
}

fn output_paths(opts: &IssueOptions) -> (PathBuf, PathBuf) {
    let (default_cert, default_key) = if opts.is_ca {
        (DEFAULT_ROOT_CERT, DEFAULT_ROOT_KEY)
    } else {
        (DEFAULT_CERT, DEFAULT_KEY)
    };

    (
        opts.cert_out
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(default_cert)),
        opts.key_out
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(default_key)),
    )
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Parse an RFC 822 date such as `02 Jan 06 15:04 MST`.
///
/// Named zones from RFC 822 (`UT`, `GMT`, `Z`, `EST` .. `PDT`), numeric
/// offsets and full RFC 2822 dates are accepted.
pub fn parse_rfc822(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    let invalid = || StmgrError::ParseError(format!("invalid RFC 822 date: {:?}", input));

    let (local, zone) = input.rsplit_once(' ').ok_or_else(invalid)?;
    let offset = zone_offset(zone).ok_or_else(invalid)?;
    let naive = NaiveDateTime::parse_from_str(local.trim(), "%d %b %y %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(local.trim(), "%d %b %y %H:%M:%S"))
        .map_err(|_| invalid())?;

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(invalid)
}

fn zone_offset(zone: &str) -> Option<FixedOffset> {
    let hours = match zone.to_ascii_uppercase().as_str() {
        "UT" | "UTC" | "GMT" | "Z" => 0,
        "EDT" => -4,
        "EST" | "CDT" => -5,
        "CST" | "MDT" => -6,
        "MST" | "PDT" => -7,
        "PST" => -8,
        _ => return parse_numeric_zone(zone),
    };
    FixedOffset::east_opt(hours * 3600)
}

fn parse_numeric_zone(zone: &str) -> Option<FixedOffset> {
    let (sign, digits) = match zone.as_bytes().first()? {
        b'+' => (1, &zone[1..]),
        b'-' => (-1, &zone[1..]),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::chain::verify_issued_by;
    use crate::cert::x509_signing::is_ca;
    use chrono::Timelike;
    use tempfile::TempDir;

    fn options_in(dir: &Path, is_ca: bool, name: &str) -> IssueOptions {
        IssueOptions {
            is_ca,
            cert_out: Some(dir.join(format!("{}cert.pem", name))),
            key_out: Some(dir.join(format!("{}key.pem", name))),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_rfc822_utc() {
        let dt = parse_rfc822("02 Jan 06 15:04 UTC").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 0).unwrap());
    }

    #[test]
    fn test_parse_rfc822_named_zone() {
        let dt = parse_rfc822("02 Jan 06 15:04 MST").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2006, 1, 2, 22, 4, 0).unwrap());
    }

    #[test]
    fn test_parse_rfc822_numeric_zone() {
        let dt = parse_rfc822("02 Jan 06 15:04 +0130").unwrap();
        assert_eq!(dt.hour(), 13);
        assert_eq!(dt.minute(), 34);
    }

    #[test]
    fn test_parse_rfc2822() {
        let dt = parse_rfc822("Mon, 02 Jan 2006 15:04:05 +0000").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap());
    }

    #[test]
    fn test_parse_rfc822_garbage() {
        assert!(matches!(
            parse_rfc822("yesterday"),
            Err(StmgrError::ParseError(_))
        ));
        assert!(parse_rfc822("02 Jan 06 15:04 XYZ").is_err());
    }

    #[test]
    fn test_default_output_paths() {
        let root = IssueOptions {
            is_ca: true,
            ..Default::default()
        };
        assert_eq!(
            output_paths(&root),
            (PathBuf::from("rootcert.pem"), PathBuf::from("rootkey.pem"))
        );
        assert_eq!(
            output_paths(&IssueOptions::default()),
            (PathBuf::from("cert.pem"), PathBuf::from("key.pem"))
        );
    }

    #[test]
    fn test_default_validity_is_72_hours() {
        let now = Utc::now();
        let window = resolve_validity(&IssueOptions::default(), now).unwrap();
        assert_eq!(window.not_before, now);
        assert_eq!(window.not_after - window.not_before, Duration::hours(72));
    }

    #[test]
    fn test_issue_root_ignores_root_material() {
        let dir = TempDir::new().unwrap();
        let mut opts = options_in(dir.path(), true, "root");
        opts.root_cert = Some(dir.path().join("does-not-exist.pem"));
        opts.root_key = Some(dir.path().join("also-missing.pem"));

        let files = issue(&opts).unwrap();
        let cert = load_certificate_file(&files.certificate).unwrap();
        assert!(is_ca(&cert));
        assert!(load_private_key_file(&files.key).is_ok());
    }

    #[test]
    fn test_issue_leaf_signed_by_root() {
        let dir = TempDir::new().unwrap();
        let root = issue(&options_in(dir.path(), true, "root")).unwrap();

        let mut opts = options_in(dir.path(), false, "");
        opts.root_cert = Some(root.certificate.clone());
        opts.root_key = Some(root.key.clone());
        let leaf = issue(&opts).unwrap();

        let root_cert = load_certificate_file(&root.certificate).unwrap();
        let leaf_cert = load_certificate_file(&leaf.certificate).unwrap();
        assert!(verify_issued_by(&leaf_cert, &root_cert).is_ok());
    }

    #[test]
    fn test_issue_leaf_without_root_material() {
        let dir = TempDir::new().unwrap();
        let result = issue(&options_in(dir.path(), false, ""));
        assert!(matches!(result, Err(StmgrError::MissingRootMaterial(_))));

        let mut opts = options_in(dir.path(), false, "");
        opts.root_cert = Some(dir.path().join("missing.pem"));
        opts.root_key = Some(dir.path().join("missing-key.pem"));
        let result = issue(&opts);
        assert!(matches!(result, Err(StmgrError::MissingRootMaterial(_))));

        // Nothing was written
        assert!(!dir.path().join("cert.pem").exists());
    }

    #[test]
    fn test_issue_leaf_inverted_dates() {
        let dir = TempDir::new().unwrap();
        let root = issue(&options_in(dir.path(), true, "root")).unwrap();

        let mut opts = options_in(dir.path(), false, "");
        opts.root_cert = Some(root.certificate);
        opts.root_key = Some(root.key);
        opts.valid_from = Some("10 Mar 30 12:00 UTC".to_string());
        opts.valid_until = Some("09 Mar 30 12:00 UTC".to_string());

        let result = issue(&opts);
        assert!(matches!(result, Err(StmgrError::InvalidDateRange { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_issued_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let files = issue(&options_in(dir.path(), true, "root")).unwrap();
        for path in [&files.key, &files.certificate] {
            let mode = std::fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{}", path.display());
        }
    }

    #[test]
    fn test_failed_certificate_write_removes_key() {
        let dir = TempDir::new().unwrap();
        let opts = IssueOptions {
            is_ca: true,
            cert_out: Some(dir.path().join("missing-dir").join("rootcert.pem")),
            key_out: Some(dir.path().join("rootkey.pem")),
            ..Default::default()
        };

        assert!(issue(&opts).is_err());
        assert!(!dir.path().join("rootkey.pem").exists());
    }
}

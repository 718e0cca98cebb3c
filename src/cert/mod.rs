//! Certificate module.
//!
//! Ed25519 X.509 certificates for OS package signing: a self-signed root and
//! signing certificates issued directly by it.

pub mod chain;
pub mod loader;
pub mod x509_signing;

//! stmgr: System Transparency OS package tooling
//!
//! This library builds, signs and verifies OS packages and issues the Ed25519
//! X.509 certificates used to sign them:
//!
//! - Issue self-signed root certificates and signing certificates
//! - Build an OS package (ZIP archive + JSON descriptor) from a kernel,
//!   an optional initramfs and a kernel command line
//! - Sign a package, appending one signature per signer to the descriptor
//! - Verify a package against a pool of trusted roots and a signature threshold
//! - Provision the host configuration read by the bootloader
//!
//! All operations are synchronous and return `Result`; nothing is retried.
//!
//! # Example
//!
//! ```rust,no_run
//! use stmgr::keygen::{issue, IssueOptions};
//! use stmgr::error::Result;
//!
//! fn example() -> Result<()> {
//!     let root = issue(&IssueOptions { is_ca: true, ..Default::default() })?;
//!     let signer = issue(&IssueOptions {
//!         root_cert: Some(root.certificate),
//!         root_key: Some(root.key),
//!         ..Default::default()
//!     })?;
//!     println!("signing certificate: {}", signer.certificate.display());
//!     Ok(())
//! }
//! ```

pub mod cert;
pub mod crypto;
pub mod error;
pub mod fsutil;
pub mod keygen;
pub mod ospkg;
pub mod provision;

// Re-export commonly used types
pub use error::{Result, StmgrError};

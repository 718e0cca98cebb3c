//! OS packages.
//!
//! An OS package is a ZIP archive (kernel, optional initramfs, command line)
//! plus a JSON descriptor holding the metadata, the content hashes and the
//! signatures.
//!
//! # Example
//!
//! ```rust,no_run
//! use stmgr::ospkg::builder::{build, BuildOptions};
//! use stmgr::ospkg::signer::sign;
//! use std::path::{Path, PathBuf};
//!
//! # fn example() -> stmgr::error::Result<()> {
//! let paths = build(&BuildOptions {
//!     kernel: Some(PathBuf::from("vmlinuz")),
//!     cmdline: Some("console=ttyS0".to_string()),
//!     ..Default::default()
//! })?;
//! sign(Path::new("key.pem"), Path::new("cert.pem"), &paths.descriptor)?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod builder;
pub mod descriptor;
pub mod paths;
pub mod show;
pub mod signer;
pub mod verifier;

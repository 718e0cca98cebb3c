//! Cryptographic primitives.
//!
//! - Ed25519 key generation, PKCS#8 PEM encoding and signatures
//! - SHA-256 content hashing
//!
//! # Example
//!
//! ```rust
//! use stmgr::crypto::ed25519::{generate_ed25519_keypair, import_ed25519_from_pem};
//!
//! # fn example() -> stmgr::error::Result<()> {
//! let keypair = generate_ed25519_keypair()?;
//! let pem = keypair.to_pkcs8_pem();
//! let restored = import_ed25519_from_pem(&pem)?;
//! assert_eq!(keypair.public_bytes(), restored.public_bytes());
//! # Ok(())
//! # }
//! ```

pub mod ed25519;
pub mod hash;

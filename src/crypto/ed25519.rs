//! Ed25519 key operations.
//!
//! Key pairs are generated from the operating system's CSPRNG and persisted as
//! PKCS#8 `PRIVATE KEY` PEM documents (RFC 8410).

use crate::crypto::hash::sha256_hex;
use crate::error::{Result, StmgrError};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// PKCS#8 v1 prefix for a bare Ed25519 private key, followed by the 32 key bytes.
const PKCS8_ED25519_PREFIX: [u8; 16] = [
    0x30, 0x2e, // SEQUENCE (46 bytes)
    0x02, 0x01, 0x00, // INTEGER 0 (version)
    0x30, 0x05, // SEQUENCE (algorithm identifier)
    0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
    0x04, 0x22, // OCTET STRING (34 bytes)
    0x04, 0x20, // OCTET STRING (32 bytes) - the actual key
];

const PRIVATE_KEY_TAG: &str = "PRIVATE KEY";

/// An Ed25519 keypair consisting of a secret key and public key.
///
/// The secret half is zeroized when the keypair is dropped.
#[derive(Debug, Clone)]
pub struct Keypair {
    pub secret: SigningKey,
    pub public: VerifyingKey,
}

impl Keypair {
    /// Create a new keypair from a signing key.
    pub fn from_secret(secret: SigningKey) -> Self {
        let public = secret.verifying_key();
        Self { secret, public }
    }

    /// Get the public key as bytes.
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.secret.sign(message)
    }

    /// Verify a signature.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        verify_signature(&self.public, message, signature)
    }

    /// Encode the secret key as a PKCS#8 PEM document.
    pub fn to_pkcs8_pem(&self) -> Zeroizing<String> {
        let mut der = Zeroizing::new(Vec::with_capacity(PKCS8_ED25519_PREFIX.len() + 32));
        der.extend_from_slice(&PKCS8_ED25519_PREFIX);
        der.extend_from_slice(self.secret.as_bytes());

        let document = pem::Pem::new(PRIVATE_KEY_TAG, std::mem::take(&mut *der));
        let encoded = Zeroizing::new(pem::encode(&document));
        drop(Zeroizing::new(document.into_contents()));
        encoded
    }

    /// Lowercase hex SHA-256 of the public key bytes.
    pub fn fingerprint(&self) -> String {
        sha256_hex(self.public.as_bytes())
    }
}

/// Verify `signature` over `message` with a bare public key.
pub fn verify_signature(
    public: &VerifyingKey,
    message: &[u8],
    signature: &Signature,
) -> Result<()> {
    public
        .verify(message, signature)
        .map_err(|e| StmgrError::CryptoError(format!("Signature verification failed: {}", e)))
}

/// Generate a new Ed25519 keypair using a cryptographically secure random number generator.
///
/// # Example
///
/// ```
/// use stmgr::crypto::ed25519::generate_ed25519_keypair;
///
/// let keypair = generate_ed25519_keypair().unwrap();
/// assert_eq!(keypair.public_bytes().len(), 32);
/// ```
pub fn generate_ed25519_keypair() -> Result<Keypair> {
    let secret = SigningKey::generate(&mut OsRng);
    Ok(Keypair::from_secret(secret))
}

/// Import an Ed25519 keypair from a 32-byte secret key.
pub fn import_ed25519_from_bytes(bytes: &[u8]) -> Result<Keypair> {
    if bytes.len() != 32 {
        return Err(StmgrError::InvalidKeyError(format!(
            "Expected 32 bytes for Ed25519 secret key, got {}",
            bytes.len()
        )));
    }

    let mut key_bytes = Zeroizing::new([0u8; 32]);
    key_bytes.copy_from_slice(bytes);

    let secret = SigningKey::from_bytes(&key_bytes);
    Ok(Keypair::from_secret(secret))
}

/// Import an Ed25519 keypair from a PKCS#8 `PRIVATE KEY` PEM document.
///
/// # Example
///
/// ```
/// use stmgr::crypto::ed25519::{generate_ed25519_keypair, import_ed25519_from_pem};
///
/// let keypair = generate_ed25519_keypair().unwrap();
/// let pem = keypair.to_pkcs8_pem();
/// let imported = import_ed25519_from_pem(&pem).unwrap();
/// assert_eq!(keypair.public_bytes(), imported.public_bytes());
/// ```
pub fn import_ed25519_from_pem(pem_str: &str) -> Result<Keypair> {
    let parsed = pem::parse(pem_str)
        .map_err(|e| StmgrError::PemError(format!("Failed to parse PEM: {}", e)))?;

    if parsed.tag() != PRIVATE_KEY_TAG {
        return Err(StmgrError::PemError(format!(
            "Expected {}, got {}",
            PRIVATE_KEY_TAG,
            parsed.tag()
        )));
    }

    let der = Zeroizing::new(parsed.into_contents());
    match der.strip_prefix(&PKCS8_ED25519_PREFIX[..]) {
        Some(secret) => import_ed25519_from_bytes(secret),
        None => Err(StmgrError::InvalidKeyError(
            "not a PKCS#8 Ed25519 private key".to_string(),
        )),
    }
}

//! Certificate and signature providers
//!
//! The host never holds card keys itself. A [`Signer`] stands for whatever
//! middleware owns them: it hands out certificates and signs digests.

use std::fmt;
use std::fs;
use std::path::Path;

use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature, SigningKey};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::cert::{CertError, CertificateInfo};

/// Signer failures
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// No certificate (or no card) is available
    #[error("No certificates available")]
    NoCertificates,

    /// User declined the operation
    #[error("Cancelled by user")]
    UserCancel,

    /// Signing itself failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Key or certificate material could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Private key is not a valid secp256k1 scalar
    #[error("Invalid private key")]
    InvalidKey,

    /// Certificate could not be decoded
    #[error(transparent)]
    Certificate(#[from] CertError),
}

/// Provider of certificates and signatures
pub trait Signer: fmt::Debug {
    /// JWS algorithm name of authentication signatures
    fn algorithm(&self) -> &'static str {
        "RS256"
    }

    /// DER certificate used for authentication tokens
    fn authentication_certificate(&mut self) -> Result<Vec<u8>, SignerError>;

    /// Sign a SHA-256 digest with the authentication key
    fn authenticate(&mut self, digest: &[u8]) -> Result<Vec<u8>, SignerError>;

    /// DER certificate used for document signatures
    fn signing_certificate(&mut self) -> Result<Vec<u8>, SignerError>;

    /// Sign a hash with the key belonging to `certificate`
    fn sign(
        &mut self,
        certificate: &[u8],
        hash: &[u8],
        hash_algorithm: Option<&str>,
    ) -> Result<Vec<u8>, SignerError>;
}

/// Signer used when no middleware is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableSigner;

impl Signer for UnavailableSigner {
    fn authentication_certificate(&mut self) -> Result<Vec<u8>, SignerError> {
        Err(SignerError::NoCertificates)
    }

    fn authenticate(&mut self, _digest: &[u8]) -> Result<Vec<u8>, SignerError> {
        Err(SignerError::NoCertificates)
    }

    fn signing_certificate(&mut self) -> Result<Vec<u8>, SignerError> {
        Err(SignerError::NoCertificates)
    }

    fn sign(
        &mut self,
        _certificate: &[u8],
        _hash: &[u8],
        _hash_algorithm: Option<&str>,
    ) -> Result<Vec<u8>, SignerError> {
        Err(SignerError::NoCertificates)
    }
}

/// File-backed secp256k1 key with its certificates
///
/// Meant for development and testing: the key is read from a hex file and
/// signatures are produced in software.
pub struct KeystoreSigner {
    key: SigningKey,
    authentication: Vec<u8>,
    signing: Vec<u8>,
}

impl fmt::Debug for KeystoreSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystoreSigner")
            .field("authentication", &self.authentication.len())
            .field("signing", &self.signing.len())
            .finish_non_exhaustive()
    }
}

impl KeystoreSigner {
    /// Create a signer from a raw 32-byte key and DER certificates.
    ///
    /// Both certificates must decode; the same key serves both.
    pub fn new(key: &[u8], authentication: Vec<u8>, signing: Vec<u8>) -> Result<Self, SignerError> {
        let key = SigningKey::from_slice(key).map_err(|_| SignerError::InvalidKey)?;
        CertificateInfo::from_der(&authentication)?;
        CertificateInfo::from_der(&signing)?;
        Ok(Self {
            key,
            authentication,
            signing,
        })
    }

    /// Load the key (hex) and certificates (DER) from files. Without a
    /// separate signing certificate the authentication one is used.
    #[instrument(level = "debug", skip_all)]
    pub fn from_files(
        key: &Path,
        authentication: &Path,
        signing: Option<&Path>,
    ) -> Result<Self, SignerError> {
        let encoded = Zeroizing::new(fs::read_to_string(key)?);
        let raw = Zeroizing::new(
            hex::decode(encoded.trim()).map_err(|_| SignerError::InvalidKey)?,
        );
        let authentication = fs::read(authentication)?;
        let signing = match signing {
            Some(path) => fs::read(path)?,
            None => authentication.clone(),
        };
        debug!("Keystore loaded");
        Self::new(&raw, authentication, signing)
    }

    /// Verifying half of the key
    pub fn verifying_key(&self) -> k256::ecdsa::VerifyingKey {
        *self.key.verifying_key()
    }

    fn sign_prehash(&self, digest: &[u8]) -> Result<Vec<u8>, SignerError> {
        let signature: Signature = self
            .key
            .sign_prehash(digest)
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }
}

impl Signer for KeystoreSigner {
    fn algorithm(&self) -> &'static str {
        "ES256K"
    }

    fn authentication_certificate(&mut self) -> Result<Vec<u8>, SignerError> {
        Ok(self.authentication.clone())
    }

    fn authenticate(&mut self, digest: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.sign_prehash(digest)
    }

    fn signing_certificate(&mut self) -> Result<Vec<u8>, SignerError> {
        Ok(self.signing.clone())
    }

    fn sign(
        &mut self,
        certificate: &[u8],
        hash: &[u8],
        hash_algorithm: Option<&str>,
    ) -> Result<Vec<u8>, SignerError> {
        if certificate != self.signing {
            return Err(SignerError::NoCertificates);
        }
        debug!(?hash_algorithm, len = hash.len(), "Signing hash");
        self.sign_prehash(hash)
    }
}

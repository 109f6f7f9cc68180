//! Authentication token issuance
//!
//! A token is a compact JWS: `base64url(header) "." base64url(payload) "."
//! base64url(signature)`, each part unpadded. The signer receives the
//! SHA-256 digest of the first two parts.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cert::{CertError, CertificateInfo};
use crate::origin::Origin;
use crate::signer::{Signer, SignerError};

/// Default validity of an issued token
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(300);

/// Token issuance and parsing failures
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Signer failed or declined
    #[error(transparent)]
    Signer(#[from] SignerError),

    /// Authentication certificate could not be decoded
    #[error(transparent)]
    Certificate(#[from] CertError),

    /// Header or payload could not be serialized or parsed
    #[error("Invalid token JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Not three base64url parts
    #[error("Malformed token")]
    Malformed,
}

/// Token header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Signature algorithm
    pub alg: String,
    /// Always `JWT`
    pub typ: String,
    /// Base64 DER certificate chain, leaf first
    pub x5c: Vec<String>,
}

/// Token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Origin normal form
    pub aud: String,
    /// Caller nonce, verbatim
    pub nonce: String,
    /// Issued at, seconds since the epoch
    pub iat: u64,
    /// Expiry, seconds since the epoch
    pub exp: u64,
    /// Issuer common name of the certificate
    pub iss: String,
    /// Subject common name of the certificate
    pub sub: String,
}

/// Builds and signs authentication tokens
#[derive(Debug, Clone, Copy)]
pub struct TokenIssuer {
    lifetime: Duration,
}

impl Default for TokenIssuer {
    fn default() -> Self {
        Self::new(DEFAULT_LIFETIME)
    }
}

impl TokenIssuer {
    /// Create an issuer with the given token lifetime
    pub const fn new(lifetime: Duration) -> Self {
        Self { lifetime }
    }

    /// Issue a token for `origin` and `nonce`, issued now
    pub fn issue(
        &self,
        signer: &mut dyn Signer,
        origin: &Origin,
        nonce: &str,
    ) -> Result<String, TokenError> {
        self.issue_at(signer, origin, nonce, SystemTime::now())
    }

    /// Issue a token with an explicit issue time
    pub fn issue_at(
        &self,
        signer: &mut dyn Signer,
        origin: &Origin,
        nonce: &str,
        now: SystemTime,
    ) -> Result<String, TokenError> {
        let certificate = signer.authentication_certificate()?;
        let info = CertificateInfo::from_der(&certificate)?;

        let iat = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let header = Header {
            alg: signer.algorithm().to_string(),
            typ: "JWT".to_string(),
            x5c: vec![STANDARD.encode(&certificate)],
        };
        let claims = Claims {
            aud: origin.as_str().to_string(),
            nonce: nonce.to_string(),
            iat,
            exp: iat + self.lifetime.as_secs(),
            iss: info.issuer,
            sub: info.subject,
        };

        let signed = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
        );
        let digest = Sha256::digest(signed.as_bytes());
        let signature = signer.authenticate(&digest)?;

        debug!(aud = %claims.aud, sub = %claims.sub, "Issued token");
        Ok(format!("{signed}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }
}

/// A token split into its parts, signature not verified
#[derive(Debug, Clone, PartialEq)]
pub struct TokenParts {
    /// Decoded header
    pub header: Value,
    /// Decoded payload
    pub payload: Value,
    /// Raw signature
    pub signature: Vec<u8>,
    /// `header "." payload` as it was signed
    pub signed_data: String,
}

impl TokenParts {
    /// Split and decode a token
    pub fn parse(token: &str) -> Result<Self, TokenError> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let decode = |part: &str| {
            URL_SAFE_NO_PAD
                .decode(part)
                .map_err(|_| TokenError::Malformed)
        };
        Ok(Self {
            header: serde_json::from_slice(&decode(header)?)?,
            payload: serde_json::from_slice(&decode(payload)?)?,
            signature: decode(signature)?,
            signed_data: format!("{header}.{payload}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{KeystoreSigner, UnavailableSigner};

    const CERT: &[u8] = include_bytes!("../tests/fixtures/auth.der");
    const KEY: &str = include_str!("../tests/fixtures/key.hex");

    fn keystore() -> KeystoreSigner {
        let key = hex::decode(KEY.trim()).unwrap();
        KeystoreSigner::new(&key, CERT.to_vec(), CERT.to_vec()).unwrap()
    }

    #[test]
    fn test_token_claims() {
        let origin = Origin::parse("https://example.com/login").unwrap();
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let token = TokenIssuer::default()
            .issue_at(&mut keystore(), &origin, "n-0123", now)
            .unwrap();

        let parts = TokenParts::parse(&token).unwrap();
        assert_eq!(parts.header["alg"], "ES256K");
        assert_eq!(parts.header["typ"], "JWT");
        assert_eq!(parts.header["x5c"][0], STANDARD.encode(CERT));
        assert_eq!(parts.payload["aud"], "https://example.com");
        assert_eq!(parts.payload["nonce"], "n-0123");
        assert_eq!(parts.payload["iat"], 1_700_000_000u64);
        assert_eq!(parts.payload["exp"], 1_700_000_300u64);
        assert_eq!(parts.payload["sub"], "TAMM,MARI,38001085718");
        assert_eq!(parts.payload["iss"], "Cardgate Test CA");
        assert_eq!(parts.signature.len(), 64);
    }

    #[test]
    fn test_token_has_no_padding() {
        let origin = Origin::parse("file:///tmp/page.html").unwrap();
        let token = TokenIssuer::new(Duration::from_secs(60))
            .issue(&mut keystore(), &origin, "=/+")
            .unwrap();
        assert!(!token.contains('='));
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(TokenParts::parse(&token).unwrap().payload["nonce"], "=/+");
    }

    #[test]
    fn test_signer_failure_propagates() {
        let origin = Origin::parse("https://example.com").unwrap();
        assert!(matches!(
            TokenIssuer::default().issue(&mut UnavailableSigner, &origin, "n"),
            Err(TokenError::Signer(SignerError::NoCertificates))
        ));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(TokenParts::parse("a.b"), Err(TokenError::Malformed)));
        assert!(matches!(TokenParts::parse("a.b.c.d"), Err(TokenError::Malformed)));
    }
}

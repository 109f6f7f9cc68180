//! X.509 certificate inspection

use picky_asn1_x509::{AttributeTypeAndValueParameters, Certificate, DirectoryString, Name, oids};

/// Certificate decoding failures
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    /// Not a DER certificate
    #[error("Invalid certificate: {0}")]
    Decode(#[from] picky_asn1_der::Asn1DerError),

    /// A name has no common name attribute
    #[error("Certificate {0} has no common name")]
    MissingCommonName(&'static str),
}

/// Names taken from a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Subject common name
    pub subject: String,
    /// Issuer common name
    pub issuer: String,
}

impl CertificateInfo {
    /// Decode a DER certificate and extract its common names
    pub fn from_der(der: &[u8]) -> Result<Self, CertError> {
        let certificate: Certificate = picky_asn1_der::from_bytes(der)?;
        let tbs = &certificate.tbs_certificate;
        Ok(Self {
            subject: common_name(&tbs.subject).ok_or(CertError::MissingCommonName("subject"))?,
            issuer: common_name(&tbs.issuer).ok_or(CertError::MissingCommonName("issuer"))?,
        })
    }
}

fn common_name(name: &Name) -> Option<String> {
    name.0.0
        .iter()
        .filter_map(|rdn| rdn.0.first())
        .filter(|attribute| attribute.ty.0 == oids::at_common_name())
        .find_map(|attribute| match &attribute.value {
            AttributeTypeAndValueParameters::CommonName(DirectoryString::PrintableString(name)) => {
                Some(name.to_string())
            }
            AttributeTypeAndValueParameters::CommonName(DirectoryString::Utf8String(name)) => {
                Some(name.clone())
            }
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT: &[u8] = include_bytes!("../tests/fixtures/auth.der");

    #[test]
    fn test_common_names() {
        let info = CertificateInfo::from_der(CERT).unwrap();
        assert_eq!(info.subject, "TAMM,MARI,38001085718");
        assert_eq!(info.issuer, "Cardgate Test CA");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            CertificateInfo::from_der(&[0x30, 0x03, 0x02, 0x01, 0x00]),
            Err(CertError::Decode(_))
        ));
        assert!(CertificateInfo::from_der(b"").is_err());
    }
}

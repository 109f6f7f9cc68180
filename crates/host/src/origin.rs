//! Calling page origin classification

use std::fmt;
use std::str::FromStr;

use url::Url;

/// Kind of origin a page was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    /// `https://` on any host
    Https,
    /// `http://localhost` on any port
    HttpLocalhost,
    /// `file://`, path ignored
    File,
}

/// Rejected origins
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OriginError {
    /// Not a parseable absolute URL
    #[error("Malformed origin: {0}")]
    Malformed(String),

    /// Well-formed but not a scheme/host combination pages may call from
    #[error("Origin not allowed: {0}")]
    Disallowed(String),
}

/// A validated, normalized origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    kind: OriginKind,
    /// `https://host[:port]`, `http://localhost[:port]` or `file://`
    normalized: String,
    /// Host name for log lines
    friendly: String,
}

impl Origin {
    /// Classify a raw origin string
    pub fn parse(raw: &str) -> Result<Self, OriginError> {
        let url = Url::parse(raw).map_err(|_| OriginError::Malformed(raw.to_string()))?;

        match url.scheme() {
            "https" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| OriginError::Malformed(raw.to_string()))?;
                Ok(Self {
                    kind: OriginKind::Https,
                    normalized: url.origin().ascii_serialization(),
                    friendly: host.to_string(),
                })
            }
            "http" if url.host_str() == Some("localhost") => Ok(Self {
                kind: OriginKind::HttpLocalhost,
                normalized: url.origin().ascii_serialization(),
                friendly: "localhost".to_string(),
            }),
            "file" => Ok(Self {
                kind: OriginKind::File,
                normalized: "file://".to_string(),
                friendly: "localhost".to_string(),
            }),
            _ => Err(OriginError::Disallowed(raw.to_string())),
        }
    }

    /// Kind of origin
    pub const fn kind(&self) -> OriginKind {
        self.kind
    }

    /// Normal form, used as token audience and for equality
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// Host the page came from, `localhost` for local files
    pub fn friendly_name(&self) -> &str {
        &self.friendly
    }
}

impl FromStr for Origin {
    type Err = OriginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_normal_form() {
        let origin = Origin::parse("https://example.com/").unwrap();
        assert_eq!(origin.kind(), OriginKind::Https);
        assert_eq!(origin.as_str(), "https://example.com");
        assert_eq!(origin.friendly_name(), "example.com");

        let origin = Origin::parse("https://Example.COM:443/path?q=1#frag").unwrap();
        assert_eq!(origin.as_str(), "https://example.com");

        let origin = Origin::parse("https://example.com:8443/").unwrap();
        assert_eq!(origin.as_str(), "https://example.com:8443");
    }

    #[test]
    fn test_http_only_on_localhost() {
        let origin = Origin::parse("http://localhost:8080/test?x=y#z").unwrap();
        assert_eq!(origin.kind(), OriginKind::HttpLocalhost);
        assert_eq!(origin.as_str(), "http://localhost:8080");

        assert_eq!(
            Origin::parse("http://localhost").unwrap().as_str(),
            "http://localhost"
        );
        assert!(matches!(
            Origin::parse("http://example.com/"),
            Err(OriginError::Disallowed(_))
        ));
        assert!(matches!(
            Origin::parse("http://localhost.example.com/"),
            Err(OriginError::Disallowed(_))
        ));
    }

    #[test]
    fn test_file_origin_ignores_path() {
        let a = Origin::parse("file:///home/user/test.html").unwrap();
        let b = Origin::parse("file:///tmp/other.html").unwrap();
        assert_eq!(a.kind(), OriginKind::File);
        assert_eq!(a.as_str(), "file://");
        assert_eq!(a, b);
        assert_eq!(a.friendly_name(), "localhost");
    }

    #[test]
    fn test_malformed_is_distinct_from_disallowed() {
        assert!(matches!(
            Origin::parse("foobar in da house"),
            Err(OriginError::Malformed(_))
        ));
        assert!(matches!(Origin::parse(""), Err(OriginError::Malformed(_))));
        assert!(matches!(
            Origin::parse("chrome-extension://abcdef/"),
            Err(OriginError::Disallowed(_))
        ));
        assert!(matches!(
            Origin::parse("ftp://example.com/"),
            Err(OriginError::Disallowed(_))
        ));
    }

    #[test]
    fn test_different_hosts_differ() {
        let a: Origin = "https://example.com/".parse().unwrap();
        let b: Origin = "https://badexample.com/".parse().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "https://example.com");
    }
}

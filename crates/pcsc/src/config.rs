//! Configuration options for PC/SC connections

use std::time::Duration;

use pcsc::{Protocols as PcscProtocols, ShareMode as PcscShareMode};

use crate::error::PcscError;

/// Sharing mode for card connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    /// Exclusive access to the card
    Exclusive,
    /// Shared access to the card (default)
    Shared,
    /// Direct connection to the reader
    Direct,
}

impl From<ShareMode> for PcscShareMode {
    fn from(mode: ShareMode) -> Self {
        match mode {
            ShareMode::Exclusive => Self::Exclusive,
            ShareMode::Shared => Self::Shared,
            ShareMode::Direct => Self::Direct,
        }
    }
}

/// Strategy for picking the reader to connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectStrategy {
    /// Connect to a specific reader by name, waiting for a card if it is empty
    Reader(String),

    /// Connect to any reader that already holds a card
    AnyCard,

    /// Connect to reader with a card matching this ATR pattern
    CardWithAtr(Vec<u8>, Option<Vec<u8>>), // (ATR, mask)

    /// Prefer a reader with a card, otherwise wait on the first reader
    FirstAvailable,
}

/// Configuration options for PC/SC connections
#[derive(Debug, Clone)]
pub struct PcscConfig {
    /// Sharing mode for card connections
    pub share_mode: ShareMode,

    /// Preferred protocols for card communication
    pub protocols: PcscProtocols,

    /// Automatically reconnect if the card is reset
    pub auto_reconnect: bool,

    /// How long to wait for a card to be inserted into an empty reader
    pub insert_timeout: Duration,

    /// Watch the connected reader and treat card removal as a cancellation
    pub watch_removal: bool,
}

impl Default for PcscConfig {
    fn default() -> Self {
        Self {
            share_mode: ShareMode::Shared,
            protocols: PcscProtocols::ANY,
            auto_reconnect: true,
            insert_timeout: Duration::from_secs(30),
            watch_removal: true,
        }
    }
}

impl PcscConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sharing mode
    pub const fn with_share_mode(mut self, mode: ShareMode) -> Self {
        self.share_mode = mode;
        self
    }

    /// Set the preferred protocols
    pub const fn with_protocols(mut self, protocols: PcscProtocols) -> Self {
        self.protocols = protocols;
        self
    }

    /// Set whether to automatically reconnect
    pub const fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    /// Set the card insertion timeout
    pub const fn with_insert_timeout(mut self, timeout: Duration) -> Self {
        self.insert_timeout = timeout;
        self
    }

    /// Set whether card removal is watched for while connected
    pub const fn with_watch_removal(mut self, watch_removal: bool) -> Self {
        self.watch_removal = watch_removal;
        self
    }
}

/// Parse a protocol selector as sent by the browser extension.
///
/// `"*"` selects any protocol, `"T=0"` and `"T=1"` (also written `T0`/`T1`)
/// select one.
pub fn parse_protocols(selector: &str) -> Result<PcscProtocols, PcscError> {
    match selector.trim().to_ascii_uppercase().as_str() {
        "*" | "" => Ok(PcscProtocols::ANY),
        "T=0" | "T0" => Ok(PcscProtocols::T0),
        "T=1" | "T1" => Ok(PcscProtocols::T1),
        _ => Err(PcscError::InvalidProtocol(selector.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_protocols() {
        assert_eq!(parse_protocols("*").unwrap(), PcscProtocols::ANY);
        assert_eq!(parse_protocols("T=0").unwrap(), PcscProtocols::T0);
        assert_eq!(parse_protocols("t=1").unwrap(), PcscProtocols::T1);
        assert_eq!(parse_protocols("T1").unwrap(), PcscProtocols::T1);
        assert!(matches!(
            parse_protocols("T=CL"),
            Err(PcscError::InvalidProtocol(_))
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = PcscConfig::new()
            .with_share_mode(ShareMode::Exclusive)
            .with_insert_timeout(Duration::from_secs(5))
            .with_watch_removal(false);
        assert_eq!(config.share_mode, ShareMode::Exclusive);
        assert_eq!(config.insert_timeout, Duration::from_secs(5));
        assert!(!config.watch_removal);
        assert!(config.auto_reconnect);
    }
}

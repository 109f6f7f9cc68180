//! Host configuration
//!
//! Defaults are merged with `~/.cardgate/cardgate.toml` (or the file given on
//! the command line). A missing file means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cardgate_pcsc::{ConnectStrategy, PcscConfig, ShareMode};
use figment::Figment;
use figment::providers::{Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::framing::DEFAULT_MAX_MESSAGE_SIZE;
use crate::protocol::Negotiation;
use crate::token::DEFAULT_LIFETIME;

/// Name of the configuration file inside [`config_dir`]
pub const CONFIG_FILE: &str = "cardgate.toml";

/// Configuration failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Home directory could not be determined
    #[error("Home directory not found")]
    HomeNotFound,

    /// Configuration directory could not be created
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File could not be parsed or has wrong types
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),

    /// ATR pattern or mask is not hex
    #[error("Invalid {0} hex: {1}")]
    InvalidHex(&'static str, hex::FromHexError),

    /// Keystore signer selected without its files
    #[error("Keystore signer needs `{0}`")]
    MissingSignerField(&'static str),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Wire generation negotiation
    pub protocol: Negotiation,
    /// Largest accepted incoming message in bytes
    pub max_message_size: u32,
    /// Append logs to this file instead of stderr
    pub log_file: Option<PathBuf>,
    /// Reader selection
    pub card: CardConfig,
    /// Token issuance
    pub token: TokenConfig,
    /// Certificate and signature provider
    pub signer: SignerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: Negotiation::Auto,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            log_file: None,
            card: CardConfig::default(),
            token: TokenConfig::default(),
            signer: SignerConfig::default(),
        }
    }
}

/// Sharing mode setting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareModeSetting {
    /// Shared with other applications
    #[default]
    Shared,
    /// Exclusive access
    Exclusive,
    /// Talk to the reader even without a card
    Direct,
}

impl From<ShareModeSetting> for ShareMode {
    fn from(mode: ShareModeSetting) -> Self {
        match mode {
            ShareModeSetting::Shared => Self::Shared,
            ShareModeSetting::Exclusive => Self::Exclusive,
            ShareModeSetting::Direct => Self::Direct,
        }
    }
}

/// `[card]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardConfig {
    /// Always use this reader
    pub reader: Option<String>,
    /// Prefer a card whose ATR starts with this hex pattern
    pub atr: Option<String>,
    /// Hex mask applied to `atr`
    pub atr_mask: Option<String>,
    /// Sharing mode
    pub share_mode: ShareModeSetting,
    /// Seconds to wait for a card to be inserted
    pub insert_timeout_secs: u64,
    /// Wait for insertion when no reader holds a card; otherwise fail at once
    pub wait_for_card: bool,
    /// Reconnect and retry once when the card was reset
    pub auto_reconnect: bool,
    /// Treat card removal during a connection as a cancellation
    pub watch_removal: bool,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            reader: None,
            atr: None,
            atr_mask: None,
            share_mode: ShareModeSetting::Shared,
            insert_timeout_secs: 30,
            wait_for_card: true,
            auto_reconnect: true,
            watch_removal: true,
        }
    }
}

impl CardConfig {
    /// Reader selection strategy
    pub fn connect_strategy(&self) -> Result<ConnectStrategy, ConfigError> {
        if let Some(reader) = &self.reader {
            return Ok(ConnectStrategy::Reader(reader.clone()));
        }
        let Some(atr) = &self.atr else {
            return Ok(if self.wait_for_card {
                ConnectStrategy::FirstAvailable
            } else {
                ConnectStrategy::AnyCard
            });
        };

        let pattern = hex::decode(atr).map_err(|e| ConfigError::InvalidHex("atr", e))?;
        let mask = self
            .atr_mask
            .as_deref()
            .map(hex::decode)
            .transpose()
            .map_err(|e| ConfigError::InvalidHex("atr_mask", e))?;
        Ok(ConnectStrategy::CardWithAtr(pattern, mask))
    }

    /// PC/SC connection options
    pub fn pcsc_config(&self) -> PcscConfig {
        PcscConfig::default()
            .with_share_mode(self.share_mode.into())
            .with_insert_timeout(Duration::from_secs(self.insert_timeout_secs))
            .with_auto_reconnect(self.auto_reconnect)
            .with_watch_removal(self.watch_removal)
    }
}

/// `[token]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Seconds until an issued token expires
    pub lifetime_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            lifetime_secs: DEFAULT_LIFETIME.as_secs(),
        }
    }
}

/// Signer backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerKind {
    /// Every certificate request answers `no_certificates`
    #[default]
    None,
    /// File-backed key and certificates
    Keystore,
}

/// `[signer]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Backend
    pub kind: SignerKind,
    /// DER authentication certificate
    pub certificate: Option<PathBuf>,
    /// DER signing certificate, defaults to `certificate`
    pub signing_certificate: Option<PathBuf>,
    /// Hex private key
    pub key: Option<PathBuf>,
}

impl SignerConfig {
    /// Key and authentication certificate paths of a keystore signer
    pub fn keystore_paths(&self) -> Result<(&Path, &Path), ConfigError> {
        let key = self
            .key
            .as_deref()
            .ok_or(ConfigError::MissingSignerField("key"))?;
        let certificate = self
            .certificate
            .as_deref()
            .ok_or(ConfigError::MissingSignerField("certificate"))?;
        Ok((key, certificate))
    }
}

/// Returns the base config directory for cardgate. It also creates the
/// directory if it doesn't exist yet.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let dir = std::env::home_dir()
        .ok_or(ConfigError::HomeNotFound)?
        .join(".cardgate");
    if !dir.exists() {
        std::fs::create_dir(&dir)?;
    }
    Ok(dir)
}

impl Config {
    /// Load defaults merged with `path`, or with the file in [`config_dir`]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => config_dir()?.join(CONFIG_FILE),
        };
        Self::from_figment(Self::figment().merge(Toml::file(path)))
    }

    /// Defaults as a figment, for layering further providers
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    /// Extract a configuration
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        figment.extract().map_err(|e| ConfigError::Figment(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn parse(toml: &str) -> Result<Config, ConfigError> {
        Config::from_figment(Config::figment().merge(Toml::string(toml)))
    }

    #[test]
    fn test_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.max_message_size, 8 * 1024 * 1024);
        assert_eq!(config.token.lifetime_secs, 300);
        assert_eq!(config.signer.kind, SignerKind::None);
        assert_eq!(
            config.card.connect_strategy().unwrap(),
            ConnectStrategy::FirstAvailable
        );
    }

    #[test]
    fn test_file_values() {
        let config = parse(
            r#"
            protocol = "legacy"
            log_file = "/tmp/cardgate.log"

            [card]
            atr = "3bdb96"
            atr_mask = "ff00ff"
            share_mode = "exclusive"
            insert_timeout_secs = 5
            auto_reconnect = false
            watch_removal = false

            [token]
            lifetime_secs = 60

            [signer]
            kind = "keystore"
            certificate = "auth.der"
            key = "key.hex"
            "#,
        )
        .unwrap();

        assert_eq!(config.protocol, Negotiation::Legacy);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/cardgate.log")));
        assert_eq!(
            config.card.connect_strategy().unwrap(),
            ConnectStrategy::CardWithAtr(hex!("3bdb96").to_vec(), Some(hex!("ff00ff").to_vec()))
        );
        let pcsc = config.card.pcsc_config();
        assert_eq!(pcsc.share_mode, ShareMode::Exclusive);
        assert_eq!(pcsc.insert_timeout, Duration::from_secs(5));
        assert!(!pcsc.auto_reconnect);
        assert!(!pcsc.watch_removal);
        assert_eq!(config.token.lifetime_secs, 60);

        let (key, certificate) = config.signer.keystore_paths().unwrap();
        assert_eq!(key, Path::new("key.hex"));
        assert_eq!(certificate, Path::new("auth.der"));
    }

    #[test]
    fn test_reader_takes_precedence() {
        let config = parse("[card]\nreader = \"Reader 0\"\natr = \"3b\"").unwrap();
        assert_eq!(
            config.card.connect_strategy().unwrap(),
            ConnectStrategy::Reader("Reader 0".into())
        );
    }

    #[test]
    fn test_card_without_waiting() {
        let config = parse("[card]\nwait_for_card = false\nshare_mode = \"direct\"").unwrap();
        assert_eq!(config.card.connect_strategy().unwrap(), ConnectStrategy::AnyCard);
        assert_eq!(config.card.pcsc_config().share_mode, ShareMode::Direct);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(parse("protocol = \"binary\""), Err(ConfigError::Figment(_))));

        let config = parse("[card]\natr = \"zz\"").unwrap();
        assert!(matches!(
            config.card.connect_strategy(),
            Err(ConfigError::InvalidHex("atr", _))
        ));

        let config = parse("[signer]\nkind = \"keystore\"").unwrap();
        assert!(matches!(
            config.signer.keystore_paths(),
            Err(ConfigError::MissingSignerField("key"))
        ));
    }

    #[test]
    fn test_missing_file_means_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/cardgate.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }
}

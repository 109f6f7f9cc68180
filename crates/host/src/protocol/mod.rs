//! Message model shared by both wire generations
//!
//! Incoming JSON objects are decoded by a [`Codec`] into a [`Request`], the
//! dispatcher answers with a [`Reply`] and the same codec encodes it back.
//! The legacy generation is keyed by a `type` field and reports `result`,
//! the newer one is keyed by a verb and reports `error` only on failure.

mod legacy;
mod verb;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub use legacy::LegacyCodec;
pub use verb::VerbCodec;

use crate::card::{CardError, ConnectionInfo};
use crate::signer::SignerError;
use crate::token::TokenError;

/// Wire generation spoken in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// `{"type": "AUTH", "nonce": ..}` requests, `result` in every response
    Legacy,
    /// `{"authenticate": {..}, "id": ..}` requests, `error` only on failure
    Verb,
}

impl Flavor {
    /// Codec for this generation
    pub fn codec(self) -> &'static dyn Codec {
        match self {
            Self::Legacy => &LegacyCodec,
            Self::Verb => &VerbCodec,
        }
    }
}

/// How the session picks its [`Flavor`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Negotiation {
    /// Decided by the first message: a `type` key means legacy
    #[default]
    Auto,
    /// Always legacy
    Legacy,
    /// Always verb-keyed
    Verb,
}

impl Negotiation {
    /// Pick the flavor for a session given its first message
    pub fn select(self, first: &Map<String, Value>) -> Flavor {
        match self {
            Self::Auto if first.contains_key("type") => Flavor::Legacy,
            Self::Auto | Self::Verb => Flavor::Verb,
            Self::Legacy => Flavor::Legacy,
        }
    }
}

/// Payload could not be turned into a message object; always fatal
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Not JSON at all
    #[error("Payload is not JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON, but not an object
    #[error("Payload is not a JSON object")]
    NotAnObject,

    /// `{}`
    #[error("Payload is an empty object")]
    Empty,
}

/// Parse a frame payload into a non-empty JSON object
pub fn parse_message(payload: &str) -> Result<Map<String, Value>, DecodeError> {
    match serde_json::from_str::<Value>(payload)? {
        Value::Object(map) if map.is_empty() => Err(DecodeError::Empty),
        Value::Object(map) => Ok(map),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Response sent right before the host exits on a protocol violation
pub fn fatal_response() -> Value {
    json!({ "error": "protocol", "version": crate::VERSION })
}

/// Caller-supplied correlation tokens, echoed in the reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Correlation {
    /// Legacy `nonce`
    pub nonce: Option<String>,
    /// `id` as sent, server-generated for verb-keyed requests that omit it
    pub id: Option<Value>,
}

impl Correlation {
    /// Whether neither token was supplied
    pub const fn is_empty(&self) -> bool {
        self.nonce.is_none() && self.id.is_none()
    }
}

/// A decoded command with its required fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Report the host version
    Version,
    /// Issue an authentication token bound to the origin and nonce
    Authenticate {
        /// Nonce to embed in the token
        nonce: String,
    },
    /// Fetch the signing certificate
    Certificate,
    /// Sign a hash with the certificate from the last [`Command::Certificate`]
    Sign {
        /// Base64 DER certificate
        certificate: String,
        /// Base64 hash
        hash: String,
        /// Hash algorithm name, passed through
        hash_algorithm: Option<String>,
    },
    /// Open a card connection
    Connect {
        /// Protocol selector, `*` for any
        protocol: String,
    },
    /// Relay an APDU
    Transmit {
        /// Hex APDU
        bytes: String,
    },
    /// Release the card connection
    Disconnect,
}

impl Command {
    /// Name used in log lines
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Authenticate { .. } => "authenticate",
            Self::Certificate => "cert",
            Self::Sign { .. } => "sign",
            Self::Connect { .. } => "connect",
            Self::Transmit { .. } => "transmit",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Request that is well-formed JSON but not a valid command
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidCommand {
    /// Legacy request without `nonce` or `id`
    #[error("Missing correlation nonce or id")]
    MissingCorrelation,

    /// No command key at all
    #[error("Missing command")]
    MissingCommand,

    /// Command key not recognized
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A field the command needs is absent or not a string
    #[error("Command {command} is missing field {field}")]
    MissingField {
        /// Command name
        command: &'static str,
        /// Field name
        field: &'static str,
    },
}

impl InvalidCommand {
    /// Whether the message envelope itself is incomplete. Such requests are
    /// refused before their origin is looked at.
    pub const fn is_envelope(&self) -> bool {
        matches!(self, Self::MissingCorrelation)
    }
}

/// A decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Tokens to echo
    pub correlation: Correlation,
    /// Declared origin as sent, unvalidated
    pub origin: Option<Value>,
    /// UI language tag
    pub lang: Option<String>,
    /// The command, or why there is none
    pub command: Result<Command, InvalidCommand>,
}

/// Successful command results
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Host version
    Version(String),
    /// Authentication token
    Token(String),
    /// Base64 DER certificate
    Certificate(String),
    /// Base64 signature
    Signature(String),
    /// Open card connection
    Connected(ConnectionInfo),
    /// Hex APDU response
    Bytes(String),
    /// Card connection released
    Disconnected,
}

/// Failure outcomes reported in-band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Missing or unexpected field, origin mismatch or wrong session state
    InvalidArgument,
    /// Origin rejected
    NotAllowed,
    /// No certificate available
    NoCertificates,
    /// User declined or cancelled
    UserCancel,
    /// Anything else that went wrong while serving a valid request
    TechnicalError,
    /// Card subsystem status, by its `SCARD_*` name
    Card(&'static str),
}

impl Outcome {
    /// Keyword written to the wire
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotAllowed => "not_allowed",
            Self::NoCertificates => "no_certificates",
            Self::UserCancel => "user_cancel",
            Self::TechnicalError => "technical_error",
            Self::Card(status) => status,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl From<SignerError> for Outcome {
    fn from(error: SignerError) -> Self {
        match error {
            SignerError::NoCertificates => Self::NoCertificates,
            SignerError::UserCancel => Self::UserCancel,
            _ => Self::TechnicalError,
        }
    }
}

impl From<TokenError> for Outcome {
    fn from(error: TokenError) -> Self {
        match error {
            TokenError::Signer(e) => e.into(),
            _ => Self::TechnicalError,
        }
    }
}

impl From<CardError> for Outcome {
    fn from(error: CardError) -> Self {
        Self::Card(error.status_name())
    }
}

/// Answer to one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Tokens from the request
    pub correlation: Correlation,
    /// Result of the command
    pub result: Result<Payload, Outcome>,
}

/// One wire generation
pub trait Codec: fmt::Debug + Sync {
    /// Generation implemented
    fn flavor(&self) -> Flavor;

    /// Decode a message object
    fn decode(&self, message: Map<String, Value>) -> Request;

    /// Encode a reply
    fn encode(&self, reply: &Reply) -> Value;
}

/// Value of a field, `None` when absent or `null`
pub(crate) fn present_field(message: &Map<String, Value>, key: &str) -> Option<Value> {
    message.get(key).filter(|value| !value.is_null()).cloned()
}

/// String value of a field, `None` when absent or not a string
pub(crate) fn string_field(message: &Map<String, Value>, key: &str) -> Option<String> {
    message.get(key).and_then(Value::as_str).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_rejects_non_objects() {
        assert!(matches!(parse_message("not json"), Err(DecodeError::Json(_))));
        assert!(matches!(parse_message("[1,2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(parse_message("\"VERSION\""), Err(DecodeError::NotAnObject)));
        assert!(matches!(parse_message("{}"), Err(DecodeError::Empty)));
        assert_eq!(parse_message(r#"{"type":"VERSION"}"#).unwrap().len(), 1);
    }

    #[test]
    fn test_negotiation() {
        let legacy = parse_message(r#"{"type":"VERSION","nonce":"1"}"#).unwrap();
        let verb = parse_message(r#"{"version":{},"id":"1"}"#).unwrap();

        assert_eq!(Negotiation::Auto.select(&legacy), Flavor::Legacy);
        assert_eq!(Negotiation::Auto.select(&verb), Flavor::Verb);
        assert_eq!(Negotiation::Verb.select(&legacy), Flavor::Verb);
        assert_eq!(Negotiation::Legacy.select(&verb), Flavor::Legacy);
        assert_eq!(Flavor::Verb.codec().flavor(), Flavor::Verb);
    }

    #[test]
    fn test_fatal_response_carries_version() {
        let response = fatal_response();
        assert_eq!(response["error"], "protocol");
        let version = response["version"].as_str().unwrap();
        assert!(!version.is_empty());
        assert!(version.chars().all(|c| c.is_ascii_digit() || c == '.'));
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(Outcome::from(SignerError::NoCertificates).keyword(), "no_certificates");
        assert_eq!(Outcome::from(SignerError::UserCancel).keyword(), "user_cancel");
        assert_eq!(
            Outcome::from(TokenError::Signer(SignerError::UserCancel)),
            Outcome::UserCancel
        );
        assert_eq!(Outcome::Card("SCARD_E_CANCELLED").to_string(), "SCARD_E_CANCELLED");
    }
}

//! Verb-keyed wire generation

use serde_json::{Map, Value};
use uuid::Uuid;

use super::{
    Codec, Command, Correlation, Flavor, InvalidCommand, Payload, Reply, Request, present_field,
    string_field,
};

/// Keys that are part of the envelope rather than a verb
const ENVELOPE_KEYS: &[&str] = &["origin", "id", "lang"];

/// Known verbs, in lookup order
const VERBS: &[&str] = &[
    "SCardConnect",
    "SCardDisconnect",
    "SCardTransmit",
    "sign",
    "cert",
    "certificate",
    "auth",
    "authenticate",
    "version",
];

/// Codec for `{"<verb>": {..}, "origin": .., "id": ..}` messages
#[derive(Debug, Clone, Copy, Default)]
pub struct VerbCodec;

impl VerbCodec {
    fn command(message: &Map<String, Value>) -> Result<Command, InvalidCommand> {
        let Some((verb, params)) = VERBS
            .iter()
            .find_map(|verb| message.get(*verb).map(|params| (*verb, params)))
        else {
            return Err(message
                .keys()
                .find(|key| !ENVELOPE_KEYS.contains(&key.as_str()))
                .map_or(InvalidCommand::MissingCommand, |key| {
                    InvalidCommand::UnknownCommand(key.clone())
                }));
        };
        let empty = Map::new();
        let params = params.as_object().unwrap_or(&empty);

        let field = |command: &'static str, field: &'static str| {
            string_field(params, field).ok_or(InvalidCommand::MissingField { command, field })
        };

        match verb {
            "version" => Ok(Command::Version),
            "authenticate" | "auth" => Ok(Command::Authenticate {
                nonce: field("authenticate", "nonce")?,
            }),
            "cert" | "certificate" => Ok(Command::Certificate),
            "sign" => Ok(Command::Sign {
                certificate: string_field(params, "certificate")
                    .or_else(|| string_field(params, "cert"))
                    .ok_or(InvalidCommand::MissingField {
                        command: "sign",
                        field: "certificate",
                    })?,
                hash: field("sign", "hash")?,
                hash_algorithm: string_field(params, "hashalgo"),
            }),
            "SCardConnect" => Ok(Command::Connect {
                protocol: string_field(params, "protocol").unwrap_or_else(|| "*".to_string()),
            }),
            "SCardTransmit" => Ok(Command::Transmit {
                bytes: field("SCardTransmit", "bytes")?,
            }),
            "SCardDisconnect" => Ok(Command::Disconnect),
            other => Err(InvalidCommand::UnknownCommand(other.to_string())),
        }
    }
}

impl Codec for VerbCodec {
    fn flavor(&self) -> Flavor {
        Flavor::Verb
    }

    fn decode(&self, message: Map<String, Value>) -> Request {
        let id =
            present_field(&message, "id").unwrap_or_else(|| Uuid::new_v4().to_string().into());

        Request {
            correlation: Correlation {
                nonce: None,
                id: Some(id),
            },
            origin: present_field(&message, "origin"),
            lang: string_field(&message, "lang"),
            command: Self::command(&message),
        }
    }

    fn encode(&self, reply: &Reply) -> Value {
        let mut response = Map::new();
        if let Some(id) = &reply.correlation.id {
            response.insert("id".into(), id.clone());
        }

        match &reply.result {
            Ok(Payload::Version(version)) => {
                response.insert("version".into(), version.clone().into());
            }
            Ok(Payload::Token(token)) => {
                response.insert("token".into(), token.clone().into());
                response.insert("type".into(), "JWT".into());
            }
            Ok(Payload::Certificate(cert)) => {
                response.insert("certificate".into(), cert.clone().into());
            }
            Ok(Payload::Signature(signature)) => {
                response.insert("signature".into(), signature.clone().into());
            }
            Ok(Payload::Connected(info)) => {
                response.insert("reader".into(), info.reader.clone().into());
                response.insert("atr".into(), hex::encode(&info.atr).into());
                response.insert("protocol".into(), info.protocol.clone().into());
            }
            Ok(Payload::Bytes(bytes)) => {
                response.insert("bytes".into(), bytes.clone().into());
            }
            Ok(Payload::Disconnected) => {}
            Err(outcome) => {
                response.insert("error".into(), outcome.keyword().into());
            }
        }

        Value::Object(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Outcome, parse_message};
    use serde_json::json;

    fn decode(payload: &str) -> Request {
        VerbCodec.decode(parse_message(payload).unwrap())
    }

    #[test]
    fn test_id_is_generated_when_absent() {
        let request = decode(r#"{"version":{},"origin":"https://example.com"}"#);
        let id = request.correlation.id.unwrap();
        assert!(Uuid::parse_str(id.as_str().unwrap()).is_ok());

        let request = decode(r#"{"version":{},"id":"abc"}"#);
        assert_eq!(request.correlation.id, Some(json!("abc")));
    }

    #[test]
    fn test_non_string_id_is_kept() {
        let request = decode(r#"{"version":{},"id":5}"#);
        assert_eq!(request.correlation.id, Some(json!(5)));

        let reply = Reply {
            correlation: request.correlation,
            result: Ok(Payload::Version("1.0".into())),
        };
        assert_eq!(VerbCodec.encode(&reply), json!({"id": 5, "version": "1.0"}));
    }

    #[test]
    fn test_verb_found_among_extra_keys() {
        assert_eq!(
            decode(r#"{"version":{},"agent":"x","id":"1"}"#).command,
            Ok(Command::Version)
        );
        assert_eq!(
            decode(r#"{"SCardDisconnect":{},"cert":{},"id":"1"}"#).command,
            Ok(Command::Disconnect)
        );
    }

    #[test]
    fn test_origin_kept_as_declared() {
        assert_eq!(
            decode(r#"{"version":{},"origin":42}"#).origin,
            Some(json!(42))
        );
        assert_eq!(decode(r#"{"version":{}}"#).origin, None);
    }

    #[test]
    fn test_verbs() {
        assert_eq!(
            decode(r#"{"auth":{"nonce":"n"},"id":"1"}"#).command,
            Ok(Command::Authenticate { nonce: "n".into() })
        );
        assert_eq!(
            decode(r#"{"SCardTransmit":{"bytes":"00a4000400"},"id":"1"}"#).command,
            Ok(Command::Transmit {
                bytes: "00a4000400".into()
            })
        );
        assert_eq!(
            decode(r#"{"SCardConnect":{"protocol":"T=1"},"id":"1"}"#).command,
            Ok(Command::Connect {
                protocol: "T=1".into()
            })
        );
        assert_eq!(
            decode(r#"{"sign":{"cert":"AA","hash":"BB"},"id":"1"}"#).command,
            Ok(Command::Sign {
                certificate: "AA".into(),
                hash: "BB".into(),
                hash_algorithm: None,
            })
        );
        assert_eq!(
            decode(r#"{"SCardDisconnect":{},"id":"1"}"#).command,
            Ok(Command::Disconnect)
        );
    }

    #[test]
    fn test_missing_and_unknown_verbs() {
        assert_eq!(
            decode(r#"{"origin":"https://example.com","id":"1"}"#).command,
            Err(InvalidCommand::MissingCommand)
        );
        assert_eq!(
            decode(r#"{"launch":{},"id":"1"}"#).command,
            Err(InvalidCommand::UnknownCommand("launch".into()))
        );
        assert_eq!(
            decode(r#"{"authenticate":{},"id":"1"}"#).command,
            Err(InvalidCommand::MissingField {
                command: "authenticate",
                field: "nonce"
            })
        );
    }

    #[test]
    fn test_success_never_has_error_key() {
        let reply = Reply {
            correlation: Correlation {
                nonce: None,
                id: Some("1".into()),
            },
            result: Ok(Payload::Disconnected),
        };
        assert_eq!(VerbCodec.encode(&reply), json!({"id": "1"}));

        let reply = Reply {
            correlation: Correlation {
                nonce: None,
                id: Some("1".into()),
            },
            result: Ok(Payload::Token("a.b.c".into())),
        };
        let response = VerbCodec.encode(&reply);
        assert_eq!(response["token"], "a.b.c");
        assert!(response.get("error").is_none());
    }

    #[test]
    fn test_failure_carries_error() {
        let reply = Reply {
            correlation: Correlation {
                nonce: None,
                id: Some("9".into()),
            },
            result: Err(Outcome::Card("SCARD_E_CANCELLED")),
        };
        assert_eq!(
            VerbCodec.encode(&reply),
            json!({"id": "9", "error": "SCARD_E_CANCELLED"})
        );
    }
}

//! Type-keyed wire generation

use serde_json::{Map, Value};

use super::{
    Codec, Command, Correlation, Flavor, InvalidCommand, Payload, Reply, Request, present_field,
    string_field,
};

/// Codec for `{"type": "VERSION", "nonce": .., "origin": ..}` messages
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyCodec;

impl LegacyCodec {
    fn command(message: &Map<String, Value>) -> Result<Command, InvalidCommand> {
        let kind = match message.get("type") {
            None => return Err(InvalidCommand::MissingCommand),
            Some(Value::String(kind)) => kind.as_str(),
            Some(other) => return Err(InvalidCommand::UnknownCommand(other.to_string())),
        };

        let field = |command: &'static str, field: &'static str| {
            string_field(message, field).ok_or(InvalidCommand::MissingField { command, field })
        };

        match kind {
            "VERSION" => Ok(Command::Version),
            "AUTH" => {
                let nonce = string_field(message, "auth_nonce")
                    .or_else(|| string_field(message, "nonce"))
                    .ok_or(InvalidCommand::MissingField {
                        command: "AUTH",
                        field: "nonce",
                    })?;
                Ok(Command::Authenticate { nonce })
            }
            "CERT" => Ok(Command::Certificate),
            "SIGN" => Ok(Command::Sign {
                certificate: field("SIGN", "cert")?,
                hash: field("SIGN", "hash")?,
                hash_algorithm: string_field(message, "hashalgo"),
            }),
            "CONNECT" => Ok(Command::Connect {
                protocol: string_field(message, "protocol").unwrap_or_else(|| "*".to_string()),
            }),
            "APDU" => Ok(Command::Transmit {
                bytes: field("APDU", "bytes")?,
            }),
            "DISCONNECT" => Ok(Command::Disconnect),
            other => Err(InvalidCommand::UnknownCommand(other.to_string())),
        }
    }
}

impl Codec for LegacyCodec {
    fn flavor(&self) -> Flavor {
        Flavor::Legacy
    }

    fn decode(&self, message: Map<String, Value>) -> Request {
        let correlation = Correlation {
            nonce: string_field(&message, "nonce"),
            id: present_field(&message, "id"),
        };
        let command = if correlation.is_empty() {
            Err(InvalidCommand::MissingCorrelation)
        } else {
            Self::command(&message)
        };

        Request {
            correlation,
            origin: present_field(&message, "origin"),
            lang: string_field(&message, "lang"),
            command,
        }
    }

    fn encode(&self, reply: &Reply) -> Value {
        let mut response = Map::new();
        if let Some(nonce) = &reply.correlation.nonce {
            response.insert("nonce".into(), nonce.clone().into());
        }
        if let Some(id) = &reply.correlation.id {
            response.insert("id".into(), id.clone());
        }

        match &reply.result {
            Ok(payload) => {
                response.insert("result".into(), "ok".into());
                match payload {
                    Payload::Version(version) => {
                        response.insert("version".into(), version.clone().into());
                    }
                    Payload::Token(token) => {
                        response.insert("auth_token".into(), token.clone().into());
                    }
                    Payload::Certificate(cert) => {
                        response.insert("cert".into(), cert.clone().into());
                    }
                    Payload::Signature(signature) => {
                        response.insert("signature".into(), signature.clone().into());
                    }
                    Payload::Connected(info) => {
                        response.insert("reader".into(), info.reader.clone().into());
                        response.insert("atr".into(), hex::encode(&info.atr).into());
                        response.insert("protocol".into(), info.protocol.clone().into());
                    }
                    Payload::Bytes(bytes) => {
                        response.insert("bytes".into(), bytes.clone().into());
                    }
                    Payload::Disconnected => {}
                }
            }
            Err(outcome) => {
                response.insert("result".into(), outcome.keyword().into());
            }
        }

        Value::Object(response)
    }
}

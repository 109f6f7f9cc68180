//! Command dispatch and the session loop

use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cardgate_pcsc::parse_protocols;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::card::{CardBackend, CardSessionManager};
use crate::cert::CertificateInfo;
use crate::framing::{DEFAULT_MAX_MESSAGE_SIZE, FrameError, FrameReader, FrameWriter};
use crate::origin::Origin;
use crate::protocol::{
    Command, DecodeError, InvalidCommand, Negotiation, Outcome, Payload, Reply, Request,
    fatal_response, parse_message,
};
use crate::session::Session;
use crate::signer::Signer;
use crate::token::TokenIssuer;

/// Errors that end a session with a protocol error
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    /// Framing violation or broken stream
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Payload is not a message object
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A response could not be serialized
    #[error("Failed to serialize response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Routes requests to the signer, the token issuer and the card session
pub struct Dispatcher<S, B: CardBackend> {
    signer: S,
    cards: CardSessionManager<B>,
    issuer: TokenIssuer,
    negotiation: Negotiation,
    max_message_size: u32,
}

impl<S: Signer, B: CardBackend> fmt::Debug for Dispatcher<S, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("signer", &self.signer)
            .field("cards", &self.cards)
            .field("issuer", &self.issuer)
            .field("negotiation", &self.negotiation)
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}

impl<S: Signer, B: CardBackend> Dispatcher<S, B> {
    /// Create a dispatcher with default limits and automatic negotiation
    pub fn new(signer: S, backend: B) -> Self {
        Self {
            signer,
            cards: CardSessionManager::new(backend),
            issuer: TokenIssuer::default(),
            negotiation: Negotiation::Auto,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set how the wire generation is chosen
    pub const fn with_negotiation(mut self, negotiation: Negotiation) -> Self {
        self.negotiation = negotiation;
        self
    }

    /// Set the lifetime of issued tokens
    pub const fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.issuer = TokenIssuer::new(lifetime);
        self
    }

    /// Set the largest accepted incoming message
    pub const fn with_max_message_size(mut self, max_message_size: u32) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Serve one session until the stream ends.
    ///
    /// On a protocol violation a single protocol-error response is written
    /// and the error returned. The card connection is released on every
    /// exit path.
    pub fn serve<R: Read, W: Write>(&mut self, input: R, output: W) -> Result<(), FatalError> {
        let mut reader = FrameReader::with_max_message_size(input, self.max_message_size);
        let mut writer = FrameWriter::new(output);
        let mut session = Session::new();

        let result = self.serve_session(&mut session, &mut reader, &mut writer);
        self.cards.close();
        session.close();

        match &result {
            Ok(()) => info!("Input closed, session ended"),
            Err(e) => {
                error!(error = %e, "Protocol error, terminating");
                if let Err(write_error) = writer.write_frame(&fatal_response().to_string()) {
                    debug!(error = %write_error, "Could not report protocol error");
                }
            }
        }
        result
    }

    fn serve_session<R: Read, W: Write>(
        &mut self,
        session: &mut Session,
        reader: &mut FrameReader<R>,
        writer: &mut FrameWriter<W>,
    ) -> Result<(), FatalError> {
        while let Some(payload) = reader.read_frame()? {
            let message = parse_message(&payload)?;
            let flavor = match session.flavor() {
                Some(flavor) => flavor,
                None => {
                    let flavor = self.negotiation.select(&message);
                    session.set_flavor(flavor);
                    flavor
                }
            };

            let codec = flavor.codec();
            let reply = self.handle(session, codec.decode(message));
            writer.write_frame(&serde_json::to_string(&codec.encode(&reply))?)?;
        }
        Ok(())
    }

    /// Answer a single decoded request
    pub fn handle(&mut self, session: &mut Session, request: Request) -> Reply {
        let Request {
            correlation,
            origin,
            lang,
            command,
        } = request;

        let result = self.process(session, origin, lang, command);
        if let Err(outcome) = &result {
            debug!(%outcome, "Request failed");
        }
        Reply {
            correlation,
            result,
        }
    }

    fn process(
        &mut self,
        session: &mut Session,
        origin: Option<Value>,
        lang: Option<String>,
        command: Result<Command, InvalidCommand>,
    ) -> Result<Payload, Outcome> {
        if let Err(e) = &command
            && e.is_envelope()
        {
            warn!(error = %e, "Invalid request");
            return Err(Outcome::InvalidArgument);
        }

        let raw = match origin {
            Some(Value::String(raw)) => raw,
            Some(other) => {
                warn!(origin = %other, "Origin is not a string");
                return Err(Outcome::NotAllowed);
            }
            None => {
                warn!("Request without origin");
                return Err(Outcome::InvalidArgument);
            }
        };
        let origin = Origin::parse(&raw).map_err(|e| {
            warn!(error = %e, "Origin rejected");
            Outcome::NotAllowed
        })?;
        session.check_origin(&origin).map_err(|e| {
            warn!(error = %e, "Origin mismatch");
            Outcome::InvalidArgument
        })?;

        // Rejected commands leave the session as it was
        let command = command.map_err(|e| {
            warn!(error = %e, "Invalid request");
            Outcome::InvalidArgument
        })?;
        if !session.phase().permits(&command) {
            warn!(command = command.name(), phase = ?session.phase(), "Command not allowed now");
            return Err(Outcome::InvalidArgument);
        }

        session.bind(origin).map_err(|e| {
            warn!(error = %e, "Origin mismatch");
            Outcome::InvalidArgument
        })?;
        if let Some(lang) = lang {
            session.set_lang(lang);
        }

        debug!(command = command.name(), "Handling command");
        match command {
            Command::Version => Ok(Payload::Version(crate::VERSION.to_string())),
            Command::Authenticate { nonce } => self.authenticate(session, &nonce),
            Command::Certificate => self.certificate(session),
            Command::Sign {
                certificate,
                hash,
                hash_algorithm,
            } => self.sign(session, &certificate, &hash, hash_algorithm.as_deref()),
            Command::Connect { protocol } => self.connect(session, &protocol),
            Command::Transmit { bytes } => self.transmit(&bytes),
            Command::Disconnect => {
                self.cards.close();
                session.card_closed();
                Ok(Payload::Disconnected)
            }
        }
    }

    fn authenticate(&mut self, session: &Session, nonce: &str) -> Result<Payload, Outcome> {
        let origin = session.origin().ok_or(Outcome::InvalidArgument)?;
        let token = self
            .issuer
            .issue(&mut self.signer, origin, nonce)
            .map_err(|e| {
                warn!(error = %e, "Authentication failed");
                Outcome::from(e)
            })?;
        info!(
            origin = origin.friendly_name(),
            lang = session.lang(),
            "Authentication token issued"
        );
        Ok(Payload::Token(token))
    }

    fn certificate(&mut self, session: &mut Session) -> Result<Payload, Outcome> {
        let certificate = self.signer.signing_certificate().map_err(|e| {
            warn!(error = %e, "Certificate unavailable");
            Outcome::from(e)
        })?;
        let info = CertificateInfo::from_der(&certificate).map_err(|e| {
            warn!(error = %e, "Signer returned an invalid certificate");
            Outcome::TechnicalError
        })?;
        debug!(subject = %info.subject, "Signing certificate selected");

        let encoded = STANDARD.encode(&certificate);
        session.set_signing_certificate(certificate);
        Ok(Payload::Certificate(encoded))
    }

    fn sign(
        &mut self,
        session: &Session,
        certificate: &str,
        hash: &str,
        hash_algorithm: Option<&str>,
    ) -> Result<Payload, Outcome> {
        let certificate = STANDARD
            .decode(certificate)
            .map_err(|_| Outcome::InvalidArgument)?;
        let hash = STANDARD.decode(hash).map_err(|_| Outcome::InvalidArgument)?;
        if session.signing_certificate() != Some(certificate.as_slice()) {
            warn!("Signature requested with a certificate other than the selected one");
            return Err(Outcome::InvalidArgument);
        }

        let signature = self
            .signer
            .sign(&certificate, &hash, hash_algorithm)
            .map_err(|e| {
                warn!(error = %e, "Signing failed");
                Outcome::from(e)
            })?;
        Ok(Payload::Signature(STANDARD.encode(signature)))
    }

    fn connect(&mut self, session: &mut Session, protocol: &str) -> Result<Payload, Outcome> {
        let protocols = parse_protocols(protocol).map_err(|e| {
            warn!(error = %e, "Invalid protocol selector");
            Outcome::InvalidArgument
        })?;
        let info = self.cards.open(protocols).map_err(|e| {
            warn!(error = %e, "Card connection failed");
            Outcome::from(e)
        })?;
        session.card_opened();
        Ok(Payload::Connected(info))
    }

    fn transmit(&mut self, bytes: &str) -> Result<Payload, Outcome> {
        let command = hex::decode(bytes).map_err(|_| Outcome::InvalidArgument)?;
        let response = self.cards.transmit(&command).map_err(|e| {
            warn!(error = %e, "Transmit failed");
            Outcome::from(e)
        })?;
        Ok(Payload::Bytes(hex::encode(response)))
    }
}

//! Per-connection session state

use tracing::{info, warn};

use crate::origin::Origin;
use crate::protocol::{Command, Flavor};

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    /// No origin seen yet
    #[default]
    Unbound,
    /// Origin fixed, no card connection
    Bound,
    /// A card connection is open
    CardOpen,
    /// Stream ended or a fatal error occurred
    Closed,
}

impl Phase {
    /// Whether `command` may run in this phase
    pub const fn permits(self, command: &Command) -> bool {
        match (self, command) {
            (Self::Closed, _) => false,
            (Self::CardOpen, Command::Connect { .. } | Command::Transmit { .. } | Command::Disconnect) => {
                true
            }
            (Self::CardOpen, _) => false,
            (_, Command::Transmit { .. } | Command::Disconnect) => false,
            _ => true,
        }
    }
}

/// Session bound to one browser channel
#[derive(Debug, Default)]
pub struct Session {
    phase: Phase,
    origin: Option<Origin>,
    flavor: Option<Flavor>,
    signing_certificate: Option<Vec<u8>>,
    lang: Option<String>,
}

/// The session is bound to another origin
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Origin {offered} does not match session origin {bound}")]
pub struct OriginMismatch {
    /// Origin the session is bound to
    pub bound: String,
    /// Origin the request declared
    pub offered: String,
}

impl Session {
    /// A fresh session
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Bound origin, if any
    pub const fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    /// Negotiated wire generation, if any
    pub const fn flavor(&self) -> Option<Flavor> {
        self.flavor
    }

    /// Fix the wire generation for the rest of the session
    pub fn set_flavor(&mut self, flavor: Flavor) {
        if self.flavor.is_none() {
            info!(?flavor, "Protocol flavor selected");
            self.flavor = Some(flavor);
        }
    }

    /// Check `origin` against the bound origin, if any
    pub fn check_origin(&self, origin: &Origin) -> Result<(), OriginMismatch> {
        match &self.origin {
            Some(bound) if bound != origin => Err(OriginMismatch {
                bound: bound.to_string(),
                offered: origin.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Bind the session to `origin` or check it against the bound one
    pub fn bind(&mut self, origin: Origin) -> Result<(), OriginMismatch> {
        self.check_origin(&origin)?;
        if self.origin.is_none() {
            info!(
                origin = %origin,
                kind = ?origin.kind(),
                name = origin.friendly_name(),
                "Session bound"
            );
            self.origin = Some(origin);
            if self.phase == Phase::Unbound {
                self.phase = Phase::Bound;
            }
        }
        Ok(())
    }

    /// Record the UI language; only the first one counts
    pub fn set_lang(&mut self, lang: String) {
        if self.lang.is_none() {
            info!(lang = %lang, "Language set");
            self.lang = Some(lang);
        }
    }

    /// UI language, if any
    pub fn lang(&self) -> Option<&str> {
        self.lang.as_deref()
    }

    /// Certificate returned by the last successful certificate request
    pub fn signing_certificate(&self) -> Option<&[u8]> {
        self.signing_certificate.as_deref()
    }

    /// Remember the certificate later signatures must use
    pub fn set_signing_certificate(&mut self, certificate: Vec<u8>) {
        self.signing_certificate = Some(certificate);
    }

    /// A card connection was opened
    pub fn card_opened(&mut self) {
        self.phase = Phase::CardOpen;
    }

    /// The card connection was released
    pub fn card_closed(&mut self) {
        if self.phase == Phase::CardOpen {
            self.phase = Phase::Bound;
        }
    }

    /// End the session
    pub fn close(&mut self) {
        if self.phase != Phase::Closed {
            if self.phase == Phase::CardOpen {
                warn!("Session closed with card connection open");
            }
            self.phase = Phase::Closed;
        }
    }
}

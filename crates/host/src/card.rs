//! Card session management
//!
//! A session holds at most one card connection. The connection is opened
//! through a [`CardBackend`], released on disconnect, on cancellation and
//! when the manager is dropped. After a cancellation every further transmit
//! answers `SCARD_E_CANCELLED` until the connection is closed or reopened.

use cardgate_pcsc::{
    ConnectStrategy, PcscConfig, PcscConnection, PcscDeviceManager, PcscError, Protocols,
};
use tracing::{debug, info, warn};

/// Card subsystem failures
#[derive(Debug, thiserror::Error)]
pub enum CardError {
    /// PC/SC reported an error
    #[error(transparent)]
    Pcsc(#[from] PcscError),

    /// No connection is open
    #[error("No card connection")]
    NotConnected,

    /// The connection was given up after a cancellation
    #[error("Card operation cancelled")]
    Cancelled,
}

impl CardError {
    /// Canonical `SCARD_*` name
    pub const fn status_name(&self) -> &'static str {
        match self {
            Self::Pcsc(e) => e.status_name(),
            Self::NotConnected => "SCARD_E_NO_SMARTCARD",
            Self::Cancelled => "SCARD_E_CANCELLED",
        }
    }

    /// Whether the error is a cancellation rather than a communication fault
    pub const fn is_cancelled(&self) -> bool {
        match self {
            Self::Pcsc(e) => e.is_cancelled(),
            Self::NotConnected => false,
            Self::Cancelled => true,
        }
    }
}

/// Description of an open connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Reader name
    pub reader: String,
    /// Answer To Reset
    pub atr: Vec<u8>,
    /// Active protocol, `T=0` or `T=1`
    pub protocol: String,
}

/// An open card connection
pub trait CardConnection {
    /// Describe the connection
    fn info(&self) -> ConnectionInfo;

    /// Send an APDU and return the raw response
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, CardError>;

    /// Release the card; must be idempotent
    fn close(&mut self);
}

/// Source of card connections
pub trait CardBackend {
    /// Connection type produced
    type Connection: CardConnection;

    /// Acquire a reader and card. May block for card insertion.
    fn open(&mut self, protocols: Protocols) -> Result<Self::Connection, CardError>;
}

/// Owns the session's card connection
pub struct CardSessionManager<B: CardBackend> {
    backend: B,
    connection: Option<B::Connection>,
    cancelled: bool,
}

impl<B: CardBackend> std::fmt::Debug for CardSessionManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardSessionManager")
            .field("open", &self.is_open())
            .field("cancelled", &self.cancelled)
            .finish_non_exhaustive()
    }
}

impl<B: CardBackend> CardSessionManager<B> {
    /// Create a manager with no open connection
    pub const fn new(backend: B) -> Self {
        Self {
            backend,
            connection: None,
            cancelled: false,
        }
    }

    /// Whether a connection is open
    pub const fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Open a connection, or describe the one already open
    pub fn open(&mut self, protocols: Protocols) -> Result<ConnectionInfo, CardError> {
        if let Some(connection) = &self.connection {
            debug!("Connection already open");
            return Ok(connection.info());
        }

        let connection = self.backend.open(protocols)?;
        self.cancelled = false;
        let info = connection.info();
        info!(reader = %info.reader, protocol = %info.protocol, "Card connected");
        self.connection = Some(connection);
        Ok(info)
    }

    /// Relay an APDU. A cancellation releases the connection.
    pub fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, CardError> {
        if self.cancelled {
            return Err(CardError::Cancelled);
        }
        let connection = self.connection.as_mut().ok_or(CardError::NotConnected)?;
        match connection.transmit(command) {
            Ok(response) => Ok(response),
            Err(e) if e.is_cancelled() => {
                warn!("Card operation cancelled, releasing connection");
                self.close();
                self.cancelled = true;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Release the connection if one is open
    pub fn close(&mut self) {
        self.cancelled = false;
        if let Some(mut connection) = self.connection.take() {
            connection.close();
            info!("Card disconnected");
        }
    }
}

impl<B: CardBackend> Drop for CardSessionManager<B> {
    fn drop(&mut self) {
        self.close();
    }
}

impl CardConnection for PcscConnection {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            reader: self.reader_name().to_string(),
            atr: self.atr().to_vec(),
            protocol: self.protocol_name().to_string(),
        }
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, CardError> {
        Ok(Self::transmit(self, command)?)
    }

    fn close(&mut self) {
        Self::close(self);
    }
}

/// Card backend on the local PC/SC service
///
/// The PC/SC context is established on first use so a host without a
/// running service still answers non-card requests.
#[derive(Debug)]
pub struct PcscBackend {
    manager: Option<PcscDeviceManager>,
    strategy: ConnectStrategy,
    config: PcscConfig,
}

impl PcscBackend {
    /// Create a backend with a reader selection strategy and connection options
    pub const fn new(strategy: ConnectStrategy, config: PcscConfig) -> Self {
        Self {
            manager: None,
            strategy,
            config,
        }
    }
}

impl CardBackend for PcscBackend {
    type Connection = PcscConnection;

    fn open(&mut self, protocols: Protocols) -> Result<Self::Connection, CardError> {
        let manager = match self.manager.take() {
            Some(manager) => manager,
            None => PcscDeviceManager::new()?,
        };
        let config = self.config.clone().with_protocols(protocols);
        let connection = manager.connect(self.strategy.clone(), config);
        self.manager = Some(manager);
        Ok(connection?)
    }
}

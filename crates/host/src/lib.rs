//! Browser native-messaging host for smart cards
//!
//! The host speaks length-prefixed JSON with a browser extension over
//! stdin/stdout. It gates every request by the calling page's origin,
//! issues authentication tokens, forwards certificate and signature
//! requests to a [`signer::Signer`] and relays APDUs to a card opened
//! through [`card::CardBackend`].
//!
//! # Examples
//!
//! ```no_run
//! use cardgate_host::card::PcscBackend;
//! use cardgate_host::dispatch::Dispatcher;
//! use cardgate_host::signer::UnavailableSigner;
//! use cardgate_pcsc::{ConnectStrategy, PcscConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = PcscBackend::new(ConnectStrategy::FirstAvailable, PcscConfig::default());
//! let mut dispatcher = Dispatcher::new(UnavailableSigner, backend);
//! dispatcher.serve(std::io::stdin().lock(), std::io::stdout().lock())?;
//! # Ok(())
//! # }
//! ```
pub mod card;
pub mod cert;
pub mod config;
pub mod dispatch;
pub mod framing;
pub mod origin;
pub mod protocol;
pub mod session;
pub mod signer;
pub mod token;

/// Host version reported to callers
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

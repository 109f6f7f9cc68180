//! PC/SC reader access for the cardgate native host
//!
//! This crate owns everything that talks to the PC/SC service: listing
//! readers, picking one according to a [`ConnectStrategy`], waiting for a
//! card to be inserted, relaying raw APDUs over a [`PcscConnection`] and
//! watching the connected reader for card removal.
//!
//! Every blocking call may take a human-timescale amount of time (card
//! insertion, PIN pad entry on the reader). Cancellation is reported as a
//! [`PcscError`] whose [`PcscError::status_name`] is `SCARD_E_CANCELLED`.
//!
//! # Examples
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use cardgate_pcsc::{ConnectStrategy, PcscConfig, PcscDeviceManager};
//!
//! let manager = PcscDeviceManager::new()?;
//! for reader in manager.list_readers()? {
//!     println!("{} (card: {})", reader.name(), reader.has_card());
//! }
//!
//! let mut connection = manager.connect(ConnectStrategy::FirstAvailable, PcscConfig::default())?;
//! let response = connection.transmit(&[0x00, 0xA4, 0x04, 0x00, 0x00])?;
//! println!("{}", hex::encode(response));
//! connection.close();
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

mod config;
mod connection;
mod error;
pub mod event;
mod manager;
mod reader;
mod util;
mod watch;

pub use config::{ConnectStrategy, PcscConfig, ShareMode, parse_protocols};
pub use connection::PcscConnection;
pub use error::{PcscError, status_name};
pub use event::CardEvent;
pub use manager::PcscDeviceManager;
pub use reader::PcscReader;
pub use util::match_atr;
pub use watch::ReaderWatch;

// Re-export some pcsc types for convenience
pub use pcsc::{Protocol, Protocols};

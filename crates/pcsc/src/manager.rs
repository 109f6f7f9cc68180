//! Device manager for PC/SC operations

use std::ffi::CString;
use std::time::{Duration, Instant};

use pcsc::{Context, ReaderState, Scope, State};
use tracing::{debug, info, instrument};

use crate::config::{ConnectStrategy, PcscConfig};
use crate::connection::PcscConnection;
use crate::error::PcscError;
use crate::reader::{PcscReader, card_present};
use crate::util::match_atr;

/// Manager for PC/SC device operations
pub struct PcscDeviceManager {
    /// PC/SC context
    context: Context,
}

impl std::fmt::Debug for PcscDeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcscDeviceManager").finish_non_exhaustive()
    }
}

impl PcscDeviceManager {
    /// Create a new PC/SC device manager
    pub fn new() -> Result<Self, PcscError> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context })
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<PcscReader>, PcscError> {
        let readers = match self.context.list_readers_owned() {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => return Err(PcscError::NoReadersAvailable),
            Err(e) => return Err(e.into()),
        };
        if readers.is_empty() {
            return Err(PcscError::NoReadersAvailable);
        }

        let mut result = Vec::with_capacity(readers.len());
        for reader_name in readers {
            let mut reader_states = [ReaderState::new(reader_name.as_c_str(), State::UNAWARE)];

            match self.context.get_status_change(None, &mut reader_states) {
                Ok(()) => result.push(PcscReader::from_reader_state(&reader_states[0])),
                Err(_) => {
                    // If we can't get status, assume no card
                    result.push(PcscReader::new(
                        reader_name.to_string_lossy().into_owned(),
                        false,
                        None,
                    ));
                }
            }
        }

        Ok(result)
    }

    /// Connect to a reader picked by the given strategy
    #[instrument(level = "debug", skip(self, config))]
    pub fn connect(
        &self,
        strategy: ConnectStrategy,
        config: PcscConfig,
    ) -> Result<PcscConnection, PcscError> {
        let readers = self.list_readers()?;

        let reader = match strategy {
            ConnectStrategy::Reader(name) => {
                let reader = readers
                    .into_iter()
                    .find(|r| r.name() == name)
                    .ok_or(PcscError::ReaderNotFound(name))?;
                if !reader.has_card() {
                    self.wait_for_card(reader.name(), config.insert_timeout)?;
                }
                reader
            }
            ConnectStrategy::AnyCard => readers
                .into_iter()
                .find(PcscReader::has_card)
                .ok_or_else(|| PcscError::NoCard("No reader with card found".to_string()))?,
            ConnectStrategy::CardWithAtr(pattern, mask) => readers
                .into_iter()
                .find(|r| {
                    r.atr()
                        .is_some_and(|atr| match_atr(atr, &pattern, mask.as_deref()))
                })
                .ok_or_else(|| PcscError::NoCard("No card with matching ATR found".to_string()))?,
            ConnectStrategy::FirstAvailable => {
                match readers.iter().position(PcscReader::has_card) {
                    Some(index) => readers[index].clone(),
                    None => {
                        let reader = readers[0].clone();
                        self.wait_for_card(reader.name(), config.insert_timeout)?;
                        reader
                    }
                }
            }
        };

        info!(reader = reader.name(), "Using reader");
        PcscConnection::open(self.context.clone(), reader.name(), config)
    }

    /// Block until a card is present in the reader or the timeout elapses
    ///
    /// Expiry is reported as `SCARD_E_TIMEOUT`, an `SCardCancel` on this
    /// context as `SCARD_E_CANCELLED`.
    pub fn wait_for_card(&self, reader: &str, timeout: Duration) -> Result<(), PcscError> {
        let name =
            CString::new(reader).map_err(|_| PcscError::ReaderNotFound(reader.to_string()))?;
        let mut states = [ReaderState::new(name, State::UNAWARE)];
        let deadline = Instant::now() + timeout;

        debug!(reader, ?timeout, "Waiting for card insertion");
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.context
                .get_status_change(Some(remaining), &mut states)?;

            let state = states[0].event_state();
            if card_present(state) {
                debug!(reader, "Card inserted");
                return Ok(());
            }
            if state.intersects(State::UNKNOWN | State::UNAVAILABLE) {
                return Err(PcscError::ReaderNotFound(reader.to_string()));
            }
            if remaining.is_zero() {
                return Err(PcscError::Pcsc(pcsc::Error::Timeout));
            }
            states[0].sync_current_state();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs a running PC/SC service; skipped otherwise
    #[test]
    fn test_unknown_reader_is_reported() {
        let Ok(manager) = PcscDeviceManager::new() else {
            return;
        };
        if manager.list_readers().is_err() {
            return;
        }
        let result = manager.connect(
            ConnectStrategy::Reader("No Such Reader 00 00".to_string()),
            PcscConfig::default(),
        );
        assert!(matches!(result, Err(PcscError::ReaderNotFound(_))));
    }
}

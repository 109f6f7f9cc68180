//! Open connection to one card

use std::ffi::CString;
use std::fmt;

use pcsc::{Card, Context, Disposition, Protocol};
use tracing::{debug, warn};

use crate::config::PcscConfig;
use crate::error::PcscError;
use crate::watch::ReaderWatch;

/// Connection to the card in one reader
pub struct PcscConnection {
    /// PC/SC context
    context: Context,
    /// Card handle, `None` once released
    card: Option<Card>,
    /// Reader name
    reader_name: String,
    /// Negotiated protocol
    protocol: Option<Protocol>,
    /// Answer To Reset read at connect time
    atr: Vec<u8>,
    /// Configuration
    config: PcscConfig,
    /// Removal watch, when enabled
    watch: Option<ReaderWatch>,
}

impl fmt::Debug for PcscConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscConnection")
            .field("reader_name", &self.reader_name)
            .field("has_card", &self.card.is_some())
            .field("protocol", &self.protocol)
            .field("atr", &hex::encode(&self.atr))
            .finish()
    }
}

impl PcscConnection {
    /// Connect to the card in the specified reader
    pub(crate) fn open(
        context: Context,
        reader_name: &str,
        config: PcscConfig,
    ) -> Result<Self, PcscError> {
        let mut connection = Self {
            context,
            card: None,
            reader_name: reader_name.to_string(),
            protocol: None,
            atr: Vec::new(),
            config,
            watch: None,
        };
        connection.connect_card()?;

        if connection.config.watch_removal {
            // Without a watch the card is still usable; removal then surfaces as
            // SCARD_W_REMOVED_CARD on the next transmit.
            match ReaderWatch::spawn(reader_name) {
                Ok(watch) => connection.watch = Some(watch),
                Err(e) => warn!(reader = reader_name, error = %e, "Could not watch reader"),
            }
        }

        Ok(connection)
    }

    /// Try to connect to the card
    fn connect_card(&mut self) -> Result<(), PcscError> {
        if self.card.is_some() {
            return Ok(());
        }

        let reader_cstr = CString::new(self.reader_name.clone())
            .map_err(|_| PcscError::ReaderNotFound(self.reader_name.clone()))?;

        let card = match self.context.connect(
            &reader_cstr,
            self.config.share_mode.into(),
            self.config.protocols,
        ) {
            Ok(card) => card,
            Err(pcsc::Error::NoSmartcard) => return Err(PcscError::NoCard(self.reader_name.clone())),
            Err(e) => return Err(e.into()),
        };

        let status = card.status2_owned()?;
        self.protocol = status.protocol2();
        self.atr = status.atr().to_vec();
        self.card = Some(card);

        debug!(
            reader = %self.reader_name,
            protocol = self.protocol_name(),
            atr = %hex::encode(&self.atr),
            "Card connected"
        );
        Ok(())
    }

    /// Get the reader name
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    /// Get the ATR read when the card was connected
    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    /// Get the negotiated protocol
    pub const fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    /// Negotiated protocol in the `T=0`/`T=1` notation
    pub const fn protocol_name(&self) -> &'static str {
        match self.protocol {
            Some(Protocol::T0) => "T=0",
            Some(Protocol::T1) => "T=1",
            Some(Protocol::RAW) => "RAW",
            None => "",
        }
    }

    /// Check if the card handle is still held
    pub const fn is_connected(&self) -> bool {
        self.card.is_some()
    }

    /// Transmit a raw command to the card and return the raw response
    ///
    /// A card removal, whether seen by the reader watch or reported by the
    /// service, is reported once as [`PcscError::Cancelled`]; later calls
    /// answer [`PcscError::NoCard`].
    pub fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, PcscError> {
        if self.watch.as_ref().is_some_and(ReaderWatch::poll_removed) && self.card.is_some() {
            debug!(reader = %self.reader_name, "Card removed, cancelling");
            self.release(Disposition::LeaveCard);
            return Err(PcscError::Cancelled);
        }

        let mut resets = 0;
        loop {
            let card = match &self.card {
                Some(card) => card,
                None => return Err(PcscError::NoCard(self.reader_name.clone())),
            };

            let mut response_buffer = vec![0u8; pcsc::MAX_BUFFER_SIZE_EXTENDED];
            match card.transmit(command, &mut response_buffer) {
                Ok(response) => return Ok(response.to_vec()),
                // Removal counts as cancellation
                Err(pcsc::Error::RemovedCard) => {
                    self.release(Disposition::LeaveCard);
                    return Err(PcscError::Cancelled);
                }
                Err(pcsc::Error::ResetCard) => {
                    self.release(Disposition::LeaveCard);
                    if !retry_after_reset(self.config.auto_reconnect, resets)
                        || self.connect_card().is_err()
                    {
                        return Err(pcsc::Error::ResetCard.into());
                    }
                    resets += 1;
                    debug!(reader = %self.reader_name, "Card reset, retrying after reconnect");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Release the card handle and stop the watch. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(mut watch) = self.watch.take() {
            watch.stop();
        }
        self.release(Disposition::LeaveCard);
    }

    fn release(&mut self, disposition: Disposition) {
        if let Some(card) = self.card.take() {
            if let Err((_, e)) = card.disconnect(disposition) {
                debug!(reader = %self.reader_name, error = %e, "Card disconnect failed");
            } else {
                debug!(reader = %self.reader_name, "Card disconnected");
            }
        }
    }
}

/// Transmits are retried at most this many times after a card reset
const MAX_RESET_RETRIES: u32 = 1;

/// Whether a transmit that hit a card reset may reconnect and try again
const fn retry_after_reset(auto_reconnect: bool, resets: u32) -> bool {
    auto_reconnect && resets < MAX_RESET_RETRIES
}

impl Drop for PcscConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_is_retried_once() {
        assert!(retry_after_reset(true, 0));
        assert!(!retry_after_reset(true, 1));
        assert!(!retry_after_reset(true, 7));
        assert!(!retry_after_reset(false, 0));
    }
}

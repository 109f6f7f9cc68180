//! Background watch over a connected reader
//!
//! The watch runs on its own thread with a dedicated PC/SC context, so that
//! stopping it (which cancels that context) never disturbs a transmit on the
//! connection's context.

use std::ffi::CString;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use pcsc::{Context, ReaderState, Scope, State};
use tracing::{debug, trace};

use crate::error::PcscError;
use crate::event::{CardEvent, CardEventReceiver, CardEventSender, card_event_channel};
use crate::reader::card_present;

/// How long a single status-change wait may block before re-checking the
/// running flag.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Watches one reader for card insertion and removal
pub struct ReaderWatch {
    /// Dedicated context, cancelled to wake the watch thread
    context: Context,
    /// Whether the watch thread should keep running
    running: Arc<Mutex<bool>>,
    /// Events observed since the last poll
    events: CardEventReceiver,
    /// Watch thread
    handle: Option<JoinHandle<()>>,
    /// Name of the watched reader
    reader: String,
}

impl std::fmt::Debug for ReaderWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderWatch")
            .field("reader", &self.reader)
            .field("running", &*self.running.lock())
            .finish()
    }
}

impl ReaderWatch {
    /// Start watching a reader
    pub fn spawn(reader: &str) -> Result<Self, PcscError> {
        let name =
            CString::new(reader).map_err(|_| PcscError::ReaderNotFound(reader.to_string()))?;
        let context = Context::establish(Scope::User)?;
        let running = Arc::new(Mutex::new(true));
        let (sender, events) = card_event_channel();

        let handle = {
            let context = context.clone();
            let running = Arc::clone(&running);
            thread::spawn(move || watch_loop(context, name, running, sender))
        };

        debug!(reader, "Reader watch started");
        Ok(Self {
            context,
            running,
            events,
            handle: Some(handle),
            reader: reader.to_string(),
        })
    }

    /// Drain pending events, returning whether the card went away since the
    /// last call.
    pub fn poll_removed(&self) -> bool {
        self.events
            .try_iter()
            .fold(false, |removed, event| removed | event.is_removal())
    }

    /// Stop the watch thread and wait for it to exit
    pub fn stop(&mut self) {
        *self.running.lock() = false;
        let _ = self.context.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!(reader = %self.reader, "Reader watch stopped");
        }
    }
}

impl Drop for ReaderWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_loop(context: Context, name: CString, running: Arc<Mutex<bool>>, sender: CardEventSender) {
    let reader = name.to_string_lossy().into_owned();
    let mut states = [ReaderState::new(name, State::UNAWARE)];
    let mut present: Option<bool> = None;

    while *running.lock() {
        match context.get_status_change(Some(POLL_INTERVAL), &mut states) {
            Ok(()) => {}
            Err(pcsc::Error::Timeout) => continue,
            Err(pcsc::Error::Cancelled) => break,
            Err(pcsc::Error::UnknownReader | pcsc::Error::ReaderUnavailable) => {
                let _ = sender.send(CardEvent::ReaderGone { reader });
                break;
            }
            Err(e) => {
                debug!(reader = %reader, error = %e, "Reader watch failed");
                break;
            }
        }

        let state = states[0].event_state();
        if state.intersects(State::UNKNOWN | State::UNAVAILABLE) {
            let _ = sender.send(CardEvent::ReaderGone { reader });
            break;
        }

        let now_present = card_present(state);
        match (present, now_present) {
            (Some(true), false) => {
                trace!(reader = %reader, "Card removed");
                let _ = sender.send(CardEvent::Removed {
                    reader: reader.clone(),
                });
            }
            (Some(false), true) => {
                trace!(reader = %reader, atr = %hex::encode(states[0].atr()), "Card inserted");
            }
            _ => {}
        }
        present = Some(now_present);
        states[0].sync_current_state();
    }
}

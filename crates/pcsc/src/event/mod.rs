//! Card events observed on a watched reader

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Events that end the usability of a watched reader's card
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardEvent {
    /// Card was removed from a reader
    Removed {
        /// Reader name
        reader: String,
    },
    /// The reader itself disappeared (unplugged)
    ReaderGone {
        /// Reader name
        reader: String,
    },
}

impl CardEvent {
    /// Whether this event ends the usability of an open connection
    pub const fn is_removal(&self) -> bool {
        matches!(self, Self::Removed { .. } | Self::ReaderGone { .. })
    }
}

/// Sender for card events
pub type CardEventSender = Sender<CardEvent>;
/// Receiver for card events
pub type CardEventReceiver = Receiver<CardEvent>;

/// Create an unbounded channel for card events
pub fn card_event_channel() -> (CardEventSender, CardEventReceiver) {
    unbounded()
}

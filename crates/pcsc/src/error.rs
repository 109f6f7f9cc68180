//! Error types for PC/SC access

/// PC/SC-specific errors
#[derive(Debug, thiserror::Error)]
pub enum PcscError {
    /// Error reported by the PC/SC service
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// No readers available
    #[error("No readers available")]
    NoReadersAvailable,

    /// Reader not found
    #[error("Reader not found: {0}")]
    ReaderNotFound(String),

    /// No card present in reader
    #[error("No card present in reader: {0}")]
    NoCard(String),

    /// Operation was cancelled by the user
    #[error("Operation cancelled")]
    Cancelled,

    /// Protocol selector could not be understood
    #[error("Invalid protocol selector: {0}")]
    InvalidProtocol(String),
}

impl PcscError {
    /// Canonical `SCARD_*` name of this error, as reported to the browser.
    pub const fn status_name(&self) -> &'static str {
        match self {
            Self::Pcsc(e) => status_name(*e),
            Self::NoReadersAvailable => "SCARD_E_NO_READERS_AVAILABLE",
            Self::ReaderNotFound(_) => "SCARD_E_UNKNOWN_READER",
            Self::NoCard(_) => "SCARD_E_NO_SMARTCARD",
            Self::Cancelled => "SCARD_E_CANCELLED",
            Self::InvalidProtocol(_) => "SCARD_E_INVALID_PARAMETER",
        }
    }

    /// Whether the error stems from a user or `SCardCancel` cancellation.
    pub const fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Pcsc(pcsc::Error::Cancelled | pcsc::Error::CancelledByUser)
        )
    }
}

/// Map a PC/SC service error to its `SCARD_*` name.
pub const fn status_name(error: pcsc::Error) -> &'static str {
    use pcsc::Error;

    match error {
        // A PIN pad "cancel" key is the same user decision as a dismissed dialog
        Error::Cancelled | Error::CancelledByUser => "SCARD_E_CANCELLED",
        Error::Timeout => "SCARD_E_TIMEOUT",
        Error::NoSmartcard => "SCARD_E_NO_SMARTCARD",
        Error::RemovedCard => "SCARD_W_REMOVED_CARD",
        Error::ResetCard => "SCARD_W_RESET_CARD",
        Error::UnpoweredCard => "SCARD_W_UNPOWERED_CARD",
        Error::UnresponsiveCard => "SCARD_W_UNRESPONSIVE_CARD",
        Error::UnsupportedCard => "SCARD_W_UNSUPPORTED_CARD",
        Error::SharingViolation => "SCARD_E_SHARING_VIOLATION",
        Error::NoReadersAvailable => "SCARD_E_NO_READERS_AVAILABLE",
        Error::UnknownReader => "SCARD_E_UNKNOWN_READER",
        Error::ReaderUnavailable => "SCARD_E_READER_UNAVAILABLE",
        Error::NoService => "SCARD_E_NO_SERVICE",
        Error::ServiceStopped => "SCARD_E_SERVICE_STOPPED",
        Error::ProtoMismatch => "SCARD_E_PROTO_MISMATCH",
        Error::NotTransacted => "SCARD_E_NOT_TRANSACTED",
        Error::InvalidParameter => "SCARD_E_INVALID_PARAMETER",
        Error::InvalidValue => "SCARD_E_INVALID_VALUE",
        Error::InvalidHandle => "SCARD_E_INVALID_HANDLE",
        Error::InsufficientBuffer => "SCARD_E_INSUFFICIENT_BUFFER",
        Error::CommError => "SCARD_F_COMM_ERROR",
        Error::InternalError => "SCARD_F_INTERNAL_ERROR",
        Error::NoMemory => "SCARD_E_NO_MEMORY",
        Error::NotReady => "SCARD_E_NOT_READY",
        Error::SystemCancelled => "SCARD_E_SYSTEM_CANCELLED",
        Error::Shutdown => "SCARD_E_SHUTDOWN",
        _ => "SCARD_F_UNKNOWN_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(PcscError::Cancelled.status_name(), "SCARD_E_CANCELLED");
        assert_eq!(
            PcscError::Pcsc(pcsc::Error::Cancelled).status_name(),
            "SCARD_E_CANCELLED"
        );
        assert_eq!(
            PcscError::NoCard("Reader 0".into()).status_name(),
            "SCARD_E_NO_SMARTCARD"
        );
        assert_eq!(status_name(pcsc::Error::Timeout), "SCARD_E_TIMEOUT");
    }

    #[test]
    fn test_cancellation_is_distinct_from_communication_errors() {
        assert!(PcscError::Cancelled.is_cancelled());
        assert!(PcscError::Pcsc(pcsc::Error::Cancelled).is_cancelled());
        assert!(!PcscError::Pcsc(pcsc::Error::CommError).is_cancelled());
        assert!(!PcscError::Pcsc(pcsc::Error::RemovedCard).is_cancelled());
    }
}

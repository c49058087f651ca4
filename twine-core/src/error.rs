//! Bus error taxonomy

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

/// Errors surfaced by sessions and transfers
///
/// A transaction that completes cleanly is `Ok(())`. `AddressNack`,
/// `ArbitrationLost` and `Bus` are the recorded causes of a failed
/// transaction; they are reported when the session is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Bus reserved, transaction in flight or staged buffer not yet consumed
    Busy,
    /// The slave did not acknowledge its address
    AddressNack,
    /// Arbitration lost to another master
    ArbitrationLost,
    /// The controller detected a bus fault
    Bus,
    /// The session has already been closed
    Closed,
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::AddressNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            Error::ArbitrationLost => ErrorKind::ArbitrationLoss,
            Error::Bus => ErrorKind::Bus,
            Error::Busy | Error::Closed => ErrorKind::Other,
        }
    }
}

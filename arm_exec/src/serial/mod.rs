//! # Serial link module
//!
//! Half-duplex byte link to the arm's control board. The [`SerialLink`]
//! trait is the seam between the protocol engine and the hardware, so the
//! rest of the software can be driven against a scripted link in tests.
//! [`UsbSerialLink`] is the real implementation over a USB serial adapter.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod port;

pub use port::UsbSerialLink;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Baud rates the control board can be driven at.
pub const SUPPORTED_BAUDS: [u32; 10] = [
    300, 600, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200,
];

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A half-duplex serial channel to the control board.
///
/// All operations other than `open` require the link to be open. Reads are
/// window based: the link is polled for the whole window and whatever
/// arrived is returned, possibly nothing. Framing is left to the layer
/// above.
pub trait SerialLink {
    /// Open the channel to the given device at the given baud rate.
    ///
    /// Opening an already open link is an error and must leave the existing
    /// channel untouched.
    fn open(&mut self, device: &str, baud: u32) -> Result<(), LinkError>;

    /// True if the link is currently open.
    fn is_open(&self) -> bool;

    /// Write the full buffer to the device.
    fn write(&mut self, data: &[u8]) -> Result<(), LinkError>;

    /// Read whatever arrives within the given window.
    ///
    /// An empty result is not an error, it just means the board had nothing
    /// to say.
    fn read(&mut self, window: Duration) -> Result<Vec<u8>, LinkError>;

    /// Discard any unread input held by the driver.
    fn flush_input(&mut self) -> Result<(), LinkError>;

    /// Close the channel. Closing a closed link is a no-op.
    fn close(&mut self);
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors associated with the serial link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("The link is already open")]
    AlreadyOpen,

    #[error("The link is not open")]
    NotOpen,

    #[error("Baud rate {0} is not supported by the control board")]
    UnsupportedBaud(u32),

    #[error("Could not open the device: {0}")]
    OpenError(serialport::Error),

    #[error("Could not write to the device: {0}")]
    WriteError(std::io::Error),

    #[error("Could not read from the device: {0}")]
    ReadError(std::io::Error),

    #[error("Could not flush the device input buffer: {0}")]
    FlushError(serialport::Error),
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_supported_bauds() {
        assert!(SUPPORTED_BAUDS.contains(&115200));
        assert!(SUPPORTED_BAUDS.contains(&300));
        assert!(!SUPPORTED_BAUDS.contains(&110));
        assert!(!SUPPORTED_BAUDS.contains(&250000));
    }
}

//! USB serial implementation of the link.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{debug, trace};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

// Internal
use super::{LinkError, SerialLink, SUPPORTED_BAUDS};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Timeout for a single poll of the driver.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Size of the scratch buffer for a single poll.
const READ_CHUNK_SIZE: usize = 256;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Serial link over a USB adapter.
///
/// The port is configured for raw byte transfer: 8 data bits, no parity,
/// one stop bit, no flow control.
pub struct UsbSerialLink {
    port: Option<Box<dyn SerialPort>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl UsbSerialLink {
    /// Create a new link in the closed state.
    pub fn new() -> Self {
        Self { port: None }
    }
}

impl Default for UsbSerialLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLink for UsbSerialLink {
    fn open(&mut self, device: &str, baud: u32) -> Result<(), LinkError> {
        if self.port.is_some() {
            return Err(LinkError::AlreadyOpen);
        }

        if !SUPPORTED_BAUDS.contains(&baud) {
            return Err(LinkError::UnsupportedBaud(baud));
        }

        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(POLL_TIMEOUT)
            .open()
            .map_err(LinkError::OpenError)?;

        debug!("Opened {} at {} baud", device, baud);
        self.port = Some(port);

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let port = match self.port.as_mut() {
            Some(p) => p,
            None => return Err(LinkError::NotOpen),
        };

        port.write_all(data).map_err(LinkError::WriteError)?;
        trace!("TX {} bytes", data.len());

        Ok(())
    }

    fn read(&mut self, window: Duration) -> Result<Vec<u8>, LinkError> {
        let port = match self.port.as_mut() {
            Some(p) => p,
            None => return Err(LinkError::NotOpen),
        };

        let mut accum: Vec<u8> = Vec::new();
        let mut buf = [0u8; READ_CHUNK_SIZE];
        let deadline = Instant::now() + window;

        // Poll the driver in short slices until the window closes. A timed
        // out poll just means nothing arrived in that slice.
        while Instant::now() < deadline {
            match port.read(&mut buf) {
                Ok(0) => (),
                Ok(n) => {
                    trace!("RX {} bytes", n);
                    accum.extend_from_slice(&buf[..n]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => (),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => (),
                Err(e) => return Err(LinkError::ReadError(e)),
            }
        }

        Ok(accum)
    }

    fn flush_input(&mut self) -> Result<(), LinkError> {
        let port = match self.port.as_mut() {
            Some(p) => p,
            None => return Err(LinkError::NotOpen),
        };

        port.clear(ClearBuffer::Input).map_err(LinkError::FlushError)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Serial link closed");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_closed_link_rejects_io() {
        let mut link = UsbSerialLink::new();

        assert!(!link.is_open());
        assert!(matches!(link.write(b"M114\r\n"), Err(LinkError::NotOpen)));
        assert!(matches!(
            link.read(Duration::from_millis(10)),
            Err(LinkError::NotOpen)
        ));
        assert!(matches!(link.flush_input(), Err(LinkError::NotOpen)));

        // Closing a closed link must not panic
        link.close();
        assert!(!link.is_open());
    }

    #[test]
    fn test_unsupported_baud_rejected() {
        let mut link = UsbSerialLink::new();

        assert!(matches!(
            link.open("/dev/ttyUSB0", 110),
            Err(LinkError::UnsupportedBaud(110))
        ));
        assert!(!link.is_open());
    }
}

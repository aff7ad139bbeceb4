//! # Protocol engine
//!
//! Command/response exchanges with the control board. The board is half
//! duplex: one command goes down the wire, then the link is read until the
//! board signals the outcome. `OK` ends a successful command, `ERROR`
//! marks a rejected one with a diagnostic after the sentinel.
//!
//! Responses arrive in arbitrary fragments, so the engine accumulates
//! reads until it sees a sentinel or the deadline passes. Note that a
//! payload containing a literal `OK` would end accumulation early; the
//! board only ever emits the sentinels as terminators so this is accepted.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{debug, trace, warn};
use std::time::{Duration, Instant};
use thiserror::Error;

// Internal
use crate::serial::{LinkError, SerialLink};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Terminator appended to every outgoing command.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Sentinel the board sends when a command has completed.
pub const OK_SENTINEL: &str = "OK";

/// Sentinel the board sends when a command has been rejected.
pub const ERROR_SENTINEL: &str = "ERROR";

/// Window for a single read poll of the link.
const READ_SLICE: Duration = Duration::from_millis(100);

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised during an exchange with the board.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Link failure during the exchange: {0}")]
    LinkFailed(LinkError),

    #[error("The board rejected the command: {0}")]
    Device(String),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Send one command and collect the board's response.
///
/// The command is terminated and written, then the link is polled with the
/// response accumulating until it contains [`OK_SENTINEL`] or `timeout`
/// has elapsed. [`ERROR_SENTINEL`] anywhere in the accumulated response
/// raises [`ProtocolError::Device`] carrying the board's diagnostic text.
/// Otherwise the normalised response is returned; a timeout simply ends
/// the accumulation with whatever did arrive.
pub fn exchange<L: SerialLink>(
    link: &mut L,
    command: &str,
    timeout: Duration,
) -> Result<String, ProtocolError> {
    let line = format!("{}{}", command, LINE_TERMINATOR);
    link.write(line.as_bytes())
        .map_err(ProtocolError::LinkFailed)?;
    trace!("Sent {:?}", command);

    let deadline = Instant::now() + timeout;
    let mut response = String::new();

    loop {
        let chunk = link
            .read(READ_SLICE)
            .map_err(ProtocolError::LinkFailed)?;
        response.push_str(&String::from_utf8_lossy(&chunk));

        if response.contains(OK_SENTINEL) {
            break;
        }
        if Instant::now() >= deadline {
            warn!(
                "No completion sentinel within {:?} for {:?}",
                timeout, command
            );
            break;
        }
    }

    if let Some(error_pos) = response.find(ERROR_SENTINEL) {
        debug!("Board rejected {:?}: {:?}", command, normalise(&response));
        return Err(ProtocolError::Device(device_message(&response, error_pos)));
    }

    let normalised = normalise(&response);
    trace!("Board response {:?}", normalised);

    Ok(normalised)
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Normalise a raw response for presentation.
///
/// Each `OK` becomes `. OK. ` and all CR/LF characters are dropped, giving
/// one printable line however the board framed its output.
fn normalise(raw: &str) -> String {
    raw.replace(OK_SENTINEL, ". OK. ")
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect()
}

/// Extract the diagnostic text following an `ERROR` sentinel.
fn device_message(raw: &str, error_pos: usize) -> String {
    let tail = &raw[error_pos + ERROR_SENTINEL.len()..];

    // Anything from a trailing OK onwards is not part of the diagnostic
    let tail = match tail.find(OK_SENTINEL) {
        Some(ok_pos) => &tail[..ok_pos],
        None => tail,
    };

    let text: String = tail.chars().filter(|c| *c != '\r' && *c != '\n').collect();

    text.trim_matches(|c: char| c == ':' || c.is_whitespace())
        .to_string()
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::VecDeque;

    /// Link fake which replays scripted chunks, one per read poll.
    struct ScriptedLink {
        chunks: VecDeque<Vec<u8>>,
        written: Vec<Vec<u8>>,
    }

    impl ScriptedLink {
        fn new(chunks: &[&str]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
                written: Vec::new(),
            }
        }
    }

    impl SerialLink for ScriptedLink {
        fn open(&mut self, _device: &str, _baud: u32) -> Result<(), LinkError> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }

        fn write(&mut self, data: &[u8]) -> Result<(), LinkError> {
            self.written.push(data.to_vec());
            Ok(())
        }

        fn read(&mut self, _window: Duration) -> Result<Vec<u8>, LinkError> {
            Ok(self.chunks.pop_front().unwrap_or_default())
        }

        fn flush_input(&mut self) -> Result<(), LinkError> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_exchange_accumulates_fragments() {
        let mut link = ScriptedLink::new(&["INFO: MOTORS ENA", "BLED\r\nOK\r\n"]);

        let response = exchange(&mut link, "M17", Duration::from_secs(2)).unwrap();

        assert_eq!(response, "INFO: MOTORS ENABLED. OK. ");
        assert_eq!(link.written.len(), 1);
        assert_eq!(link.written[0], b"M17\r\n".to_vec());
    }

    #[test]
    fn test_exchange_device_error_with_completion() {
        let mut link = ScriptedLink::new(&["ERROR: out of bounds\r\nOK\r\n"]);

        match exchange(&mut link, "G1 X500.000 Y0.000 Z0.000 F2000.0", Duration::from_secs(2)) {
            Err(ProtocolError::Device(message)) => assert_eq!(message, "out of bounds"),
            other => panic!("expected a device error, got {:?}", other),
        }
    }

    #[test]
    fn test_exchange_device_error_without_completion() {
        // No OK ever arrives, the deadline ends the accumulation and the
        // error sentinel is still honoured
        let mut link = ScriptedLink::new(&["ERROR bad range\r\n"]);

        match exchange(&mut link, "G1 X10.000 Y0.000 Z0.000 F500.0", Duration::from_millis(50)) {
            Err(ProtocolError::Device(message)) => assert_eq!(message, "bad range"),
            other => panic!("expected a device error, got {:?}", other),
        }
    }

    #[test]
    fn test_exchange_timeout_returns_partial() {
        let mut link = ScriptedLink::new(&["INFO: thinking"]);

        let response = exchange(&mut link, "M114", Duration::from_millis(50)).unwrap();

        assert_eq!(response, "INFO: thinking");
    }

    #[test]
    fn test_exchange_write_failure_propagates() {
        struct DeadLink;

        impl SerialLink for DeadLink {
            fn open(&mut self, _device: &str, _baud: u32) -> Result<(), LinkError> {
                Ok(())
            }
            fn is_open(&self) -> bool {
                false
            }
            fn write(&mut self, _data: &[u8]) -> Result<(), LinkError> {
                Err(LinkError::NotOpen)
            }
            fn read(&mut self, _window: Duration) -> Result<Vec<u8>, LinkError> {
                Err(LinkError::NotOpen)
            }
            fn flush_input(&mut self) -> Result<(), LinkError> {
                Err(LinkError::NotOpen)
            }
            fn close(&mut self) {}
        }

        assert!(matches!(
            exchange(&mut DeadLink, "M17", Duration::from_millis(50)),
            Err(ProtocolError::LinkFailed(LinkError::NotOpen))
        ));
    }
}

//! Channel-level error types.

use thiserror::Error;

use crate::transport::TransportError;

/// Structural violations of the AVR fragment protocol.
///
/// Always fatal to the current exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("AVR command failed; invalid token: 0x{0:02X} - is another session active?")]
    InvalidCommandToken(u8),

    #[error("AVR command failed; invalid final fragment ack: 0x{0:02X}")]
    InvalidFinalAck(u8),

    #[error("AVR command failed; invalid non-final fragment ack: 0x{0:02X}")]
    InvalidNonFinalAck(u8),

    #[error("AVR response failed; invalid token: 0x{0:02X}")]
    InvalidResponseToken(u8),

    #[error("Response size does not match header: declared {declared}, available {available}")]
    ResponseSizeMismatch { declared: usize, available: usize },

    #[error("Command of {length} bytes needs {count} fragments, maximum is {max}")]
    TooManyFragments {
        length: usize,
        count: usize,
        max: usize,
    },

    #[error("DAP command 0x{expected:02X} answered with 0x{actual:02X}")]
    InvalidDapResponse { expected: u8, actual: u8 },

    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    ShortFrame { expected: usize, actual: usize },
}

/// Errors surfaced by [`AvrCommandChannel`](crate::avr::AvrCommandChannel).
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("AVR response timeout after {polls} polls ({timeout_ms}ms)")]
    Timeout { polls: u64, timeout_ms: u64 },

    #[error("AVR response polling cancelled after {polls} polls")]
    Cancelled { polls: u64 },
}

impl ChannelError {
    /// Timeouts are the one failure a caller may reasonably re-issue.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelError::Timeout { .. })
    }
}

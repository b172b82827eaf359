//! AVR fragment encoding and decoding.
//!
//! Commands larger than one frame are split into fragments tagged with a
//! `(index << 4) | total` byte and a big-endian payload length. Responses come
//! back with the same header shape under a different tag, and events use a
//! shorter three-byte header.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use super::constants::*;
use crate::error::ProtocolError;

/// Fragment index/count byte.
///
/// High nibble is the 1-based fragment index, low nibble the total count.
/// A raw value of zero means "no fragment yet" (device busy).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FragmentInfo(u8);

impl FragmentInfo {
    pub fn new(index: u8, total: u8) -> Self {
        Self(((index & 0x0F) << 4) | (total & 0x0F))
    }

    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn raw(&self) -> u8 {
        self.0
    }

    pub fn index(&self) -> u8 {
        self.0 >> 4
    }

    pub fn total(&self) -> u8 {
        self.0 & 0x0F
    }

    /// Check if this is the "still computing" marker on a response poll.
    pub fn is_busy(&self) -> bool {
        self.0 == AVR_MORE_FRAGMENTS
    }
}

impl fmt::Debug for FragmentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FragmentInfo({}/{})", self.index(), self.total())
    }
}

/// Payload bytes one fragment can carry at a given frame size.
pub fn payload_capacity(frame_size: usize) -> usize {
    frame_size.saturating_sub(AVR_CMD_COMMAND_HEADER_PAYLOAD_START)
}

/// Number of fragments needed for a command of `length` bytes (minimum 1).
pub fn fragment_count(length: usize, frame_size: usize) -> usize {
    let capacity = payload_capacity(frame_size).max(1);
    length.div_ceil(capacity).max(1)
}

/// Split a command into frame-sized, zero-padded command fragments.
///
/// Every returned fragment is exactly `frame_size` bytes. Commands needing
/// more than [`AVR_MAX_FRAGMENTS`] fragments are rejected; callers must chunk
/// at a higher level.
pub fn fragment_command(command: &[u8], frame_size: usize) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let capacity = payload_capacity(frame_size);
    if capacity == 0 {
        return Err(ProtocolError::ShortFrame {
            expected: AVR_CMD_COMMAND_HEADER_PAYLOAD_START + 1,
            actual: frame_size,
        });
    }

    let total = fragment_count(command.len(), frame_size);
    if total > AVR_MAX_FRAGMENTS {
        return Err(ProtocolError::TooManyFragments {
            length: command.len(),
            count: total,
            max: AVR_MAX_FRAGMENTS,
        });
    }

    let fragments = (0..total)
        .map(|i| {
            let start = (i * capacity).min(command.len());
            let end = (start + capacity).min(command.len());
            let slice = &command[start..end];

            let mut frame = vec![0u8; frame_size];
            frame[AVR_CMD_COMMAND_HEADER_CMD] = AVR_COMMAND;
            frame[AVR_CMD_COMMAND_HEADER_FRAGMENT_NUMBER] =
                FragmentInfo::new((i + 1) as u8, total as u8).raw();
            BigEndian::write_u16(
                &mut frame[AVR_CMD_COMMAND_HEADER_SIZE..AVR_CMD_COMMAND_HEADER_PAYLOAD_START],
                slice.len() as u16,
            );
            frame[AVR_CMD_COMMAND_HEADER_PAYLOAD_START..][..slice.len()].copy_from_slice(slice);
            frame
        })
        .collect();

    Ok(fragments)
}

/// Decode the acknowledgement code of a command fragment reply.
///
/// Fails if the echoed tag is not [`AVR_COMMAND`].
pub fn decode_command_ack(frame: &[u8]) -> Result<u8, ProtocolError> {
    let tag = *frame
        .get(AVR_CMD_RESPONSE_HEADER_CMD)
        .ok_or(ProtocolError::ShortFrame {
            expected: 2,
            actual: frame.len(),
        })?;
    if tag != AVR_COMMAND {
        return Err(ProtocolError::InvalidCommandToken(tag));
    }
    frame
        .get(AVR_CMD_RESPONSE_FRAGMENT_CODE)
        .copied()
        .ok_or(ProtocolError::ShortFrame {
            expected: 2,
            actual: frame.len(),
        })
}

/// One delivered response fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFragment {
    pub info: FragmentInfo,
    pub payload: Vec<u8>,
}

/// Outcome of a single response poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePoll {
    /// Device is still computing, poll again.
    Busy,
    /// A response fragment was delivered.
    Fragment(ResponseFragment),
}

/// Decode the reply to a response poll.
pub fn decode_response_poll(frame: &[u8]) -> Result<ResponsePoll, ProtocolError> {
    let tag = *frame
        .get(AVR_RSP_RESPONSE_HEADER_RSP)
        .ok_or(ProtocolError::ShortFrame {
            expected: 2,
            actual: frame.len(),
        })?;
    if tag != AVR_RESPONSE {
        return Err(ProtocolError::InvalidResponseToken(tag));
    }

    let info = frame
        .get(AVR_RSP_RESPONSE_HEADER_FRAGMENT_NUMBER)
        .map(|&b| FragmentInfo::from_byte(b))
        .ok_or(ProtocolError::ShortFrame {
            expected: 2,
            actual: frame.len(),
        })?;
    if info.is_busy() {
        return Ok(ResponsePoll::Busy);
    }

    if frame.len() < AVR_RSP_RESPONSE_HEADER_PAYLOAD_START {
        return Err(ProtocolError::ShortFrame {
            expected: AVR_RSP_RESPONSE_HEADER_PAYLOAD_START,
            actual: frame.len(),
        });
    }

    let declared = BigEndian::read_u16(
        &frame[AVR_RSP_RESPONSE_HEADER_SIZE..AVR_RSP_RESPONSE_HEADER_PAYLOAD_START],
    ) as usize;
    let available = frame.len() - AVR_RSP_RESPONSE_HEADER_PAYLOAD_START;
    if declared > available {
        return Err(ProtocolError::ResponseSizeMismatch {
            declared,
            available,
        });
    }

    let start = AVR_RSP_RESPONSE_HEADER_PAYLOAD_START;
    Ok(ResponsePoll::Fragment(ResponseFragment {
        info,
        payload: frame[start..start + declared].to_vec(),
    }))
}

/// Decode the reply to an event poll.
///
/// Anything that is not a well-formed event within the plausible size range
/// yields `None`.
pub fn decode_event(frame: &[u8]) -> Option<Vec<u8>> {
    if frame.get(AVR_EVENT_RESPONSE_HEADER_EVT) != Some(&AVR_EVENT) {
        return None;
    }
    let size_bytes =
        frame.get(AVR_EVENT_RESPONSE_HEADER_SIZE..AVR_EVENT_RESPONSE_HEADER_PAYLOAD_START)?;
    let size = BigEndian::read_u16(size_bytes) as usize;
    tracing::debug!(size, "AVR event received");

    if !(AVR_EVENT_RESPONSE_MIN_SIZE..AVR_EVENT_RESPONSE_MAX_SIZE).contains(&size) {
        return None;
    }
    let start = AVR_EVENT_RESPONSE_HEADER_PAYLOAD_START;
    frame.get(start..start + size).map(<[u8]>::to_vec)
}

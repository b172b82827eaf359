//! Frame transport abstraction.
//!
//! Defines the `FrameTransport` trait for fixed-size HID report I/O,
//! allowing different implementations (hidapi, mock, etc.).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceDescriptor;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No matching device (serial={serial_number:?}, product={product:?})")]
    NoMatchingDevice {
        serial_number: Option<String>,
        product: Option<String>,
    },

    #[error("{0} matching devices found, specify a serial number")]
    MultipleDevices(usize),

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Frame of {len} bytes exceeds frame size {frame_size}")]
    FrameTooLarge { len: usize, frame_size: usize },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How `read_frame` waits for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ReadMode {
    /// One blocking read per frame, returned as-is.
    #[default]
    Blocking,
    /// Spin on non-blocking reads until data arrives.
    ///
    /// With `timeout_ms: None` the spin is unbounded and a silent device
    /// hangs the caller.
    NonBlocking { timeout_ms: Option<u64> },
}

/// Fixed-size frame transport to one HID device.
///
/// This trait enables:
/// - Production implementation using hidapi
/// - Mock implementation for unit testing
/// - Future alternative HID backends
pub trait FrameTransport: Send {
    /// Write one frame, zero-padded to the frame size.
    ///
    /// Returns the byte count the device accepted. A count different from the
    /// requested one is not an error.
    fn write_frame(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read one frame (report ID stripped).
    fn read_frame(&self) -> Result<Vec<u8>, TransportError>;

    /// Write a frame then read the reply.
    fn transfer(&self, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.write_frame(data)?;
        self.read_frame()
    }

    /// Descriptor of the device behind this transport.
    fn device(&self) -> &DeviceDescriptor;

    /// Change the frame size used for subsequent I/O.
    fn set_frame_size(&mut self, frame_size: usize);

    /// Current frame size.
    fn frame_size(&self) -> usize {
        self.device().frame_size
    }

    /// Check if device is still connected.
    fn is_connected(&self) -> bool {
        true
    }
}

//! Mock frame transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{FrameTransport, TransportError};
use crate::device::DeviceDescriptor;
use crate::protocol::constants::{USB_TOOL_DEVICE_PRODUCT_ID_NEDBG_HID_MSD_DGI_CDC, USB_VID_ATMEL};
use crate::protocol::pad_frame;

/// Mock transport for unit testing channel and negotiation logic.
///
/// Clones share the response queue and write log, so a test can keep a
/// handle after moving the transport into a channel.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued frames to return on read.
    responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes, padded to the frame size (no report ID).
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Simulated device.
    descriptor: DeviceDescriptor,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_device(DeviceDescriptor::new(
            USB_VID_ATMEL,
            USB_TOOL_DEVICE_PRODUCT_ID_NEDBG_HID_MSD_DGI_CDC,
            "MCHP3290000001",
            "nEDBG CMSIS-DAP",
            "Microchip Technology Incorporated",
        ))
    }

    pub fn with_device(descriptor: DeviceDescriptor) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            descriptor,
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Queue a frame to be returned on the next read.
    pub fn queue_response(&self, frame: &[u8]) {
        self.responses.lock().unwrap().push_back(frame.to_vec());
    }

    /// Number of queued frames not yet read.
    pub fn pending_responses(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTransport for MockTransport {
    fn write_frame(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let frame_size = self.frame_size();
        if data.len() > frame_size {
            return Err(TransportError::FrameTooLarge {
                len: data.len(),
                frame_size,
            });
        }
        let report = pad_frame(data, frame_size);
        self.write_log.lock().unwrap().push(report[1..].to_vec());
        Ok(report.len())
    }

    fn read_frame(&self) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let mut frame = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TransportError::Timeout { timeout_ms: 0 })?;
        frame.resize(self.frame_size(), 0);
        Ok(frame)
    }

    fn device(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn set_frame_size(&mut self, frame_size: usize) {
        self.descriptor.set_frame_size(frame_size);
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_response_queue() {
        let mock = MockTransport::new();
        mock.queue_response(&[0x80, 0x01]);

        let frame = mock.transfer(&[0x80, 0x11]).unwrap();
        assert_eq!(frame.len(), 64);
        assert_eq!(&frame[..2], &[0x80, 0x01]);

        // Queue is empty now
        assert!(mock.read_frame().is_err());
    }

    #[test]
    fn test_mock_write_capture_is_padded() {
        let mock = MockTransport::new();
        assert_eq!(mock.write_frame(b"Hello").unwrap(), 65);

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), 64);
        assert_eq!(&writes[0][..5], b"Hello");
    }

    #[test]
    fn test_mock_rejects_oversized_frame() {
        let mock = MockTransport::new();
        assert!(matches!(
            mock.write_frame(&[0u8; 65]),
            Err(TransportError::FrameTooLarge {
                len: 65,
                frame_size: 64
            })
        ));
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(mock.write_frame(b"test").is_err());

        mock.reconnect();
        assert!(mock.write_frame(b"test").is_ok());
    }
}

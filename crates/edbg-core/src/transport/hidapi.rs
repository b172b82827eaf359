//! hidapi-based frame transport implementation.

use std::time::{Duration, Instant};

use hidapi::{HidApi, HidDevice};
use tracing::{debug, info, instrument};

use super::traits::{FrameTransport, ReadMode, TransportError};
use crate::device::DeviceDescriptor;
use crate::protocol::pad_frame;

/// hidapi-based transport.
pub struct HidApiTransport {
    device: HidDevice,
    descriptor: DeviceDescriptor,
    read_mode: ReadMode,
}

impl HidApiTransport {
    /// Open the HID device described by `descriptor`.
    #[instrument(level = "info", skip(descriptor), fields(
        vid = format!("{:04X}", descriptor.vendor_id),
        pid = format!("{:04X}", descriptor.product_id),
        serial = %descriptor.serial_number,
    ))]
    pub fn open(descriptor: DeviceDescriptor, read_mode: ReadMode) -> Result<Self, TransportError> {
        debug!(product = %descriptor.product_string, "Opening device");

        let api = HidApi::new().map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        let opened = if descriptor.serial_number.is_empty() {
            api.open(descriptor.vendor_id, descriptor.product_id)
        } else {
            api.open_serial(
                descriptor.vendor_id,
                descriptor.product_id,
                &descriptor.serial_number,
            )
        };

        let device = opened.map_err(|e| {
            descriptor.linux_udev_rule_check();
            TransportError::OpenFailed(open_failure_message(&descriptor, &e.to_string()))
        })?;

        device
            .set_blocking_mode(matches!(read_mode, ReadMode::Blocking))
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        info!(
            frame_size = descriptor.frame_size,
            read_mode = ?read_mode,
            "Device opened successfully"
        );

        Ok(Self {
            device,
            descriptor,
            read_mode,
        })
    }

    /// Log the string descriptors reported by the open device.
    pub fn log_info(&self) -> Result<(), TransportError> {
        let read_err = |e: hidapi::HidError| TransportError::ReadFailed(e.to_string());
        let manufacturer = self.device.get_manufacturer_string().map_err(read_err)?;
        let product = self.device.get_product_string().map_err(read_err)?;
        let serial = self.device.get_serial_number_string().map_err(read_err)?;

        info!("Manufacturer: {}", manufacturer.unwrap_or_default());
        info!("Product: {}", product.unwrap_or_default());
        info!("Serial Number: {}", serial.unwrap_or_default());
        Ok(())
    }
}

/// Longest single wait handed to hidapi, so unbounded reads stay responsive.
const READ_SLICE_MS: u64 = 100;

/// Repeat timed reads until one returns data or `timeout_ms` elapses.
///
/// `read` gets the wait for one attempt in milliseconds and returns the byte
/// count, 0 meaning nothing arrived. `None` never gives up.
fn read_with_deadline<F>(mut read: F, timeout_ms: Option<u64>) -> Result<usize, TransportError>
where
    F: FnMut(i32) -> Result<usize, TransportError>,
{
    let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
    loop {
        let slice_ms = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                (remaining.as_micros().div_ceil(1000) as u64).min(READ_SLICE_MS)
            }
            None => READ_SLICE_MS,
        };

        let n = read(slice_ms as i32)?;
        if n > 0 {
            return Ok(n);
        }
        if let (Some(deadline), Some(timeout_ms)) = (deadline, timeout_ms)
            && Instant::now() >= deadline
        {
            return Err(TransportError::Timeout { timeout_ms });
        }
    }
}

fn open_failure_message(descriptor: &DeviceDescriptor, cause: &str) -> String {
    if cfg!(target_os = "linux") {
        format!(
            "{cause} (check that a udev rule exists for this device: {})",
            descriptor.udev_rule()
        )
    } else {
        cause.to_string()
    }
}

impl FrameTransport for HidApiTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write_frame(&self, data: &[u8]) -> Result<usize, TransportError> {
        let frame_size = self.frame_size();
        if data.len() > frame_size {
            return Err(TransportError::FrameTooLarge {
                len: data.len(),
                frame_size,
            });
        }

        let report = pad_frame(data, frame_size);
        let written = self
            .device
            .write(&report)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        if written != report.len() {
            // 3G tools accept either 64 or 512 until the size is known
            debug!(
                requested = report.len(),
                bytes_written = written,
                "Short HID write"
            );
        } else {
            debug!(bytes_written = written, "Write complete");
        }
        Ok(written)
    }

    #[instrument(skip(self), fields(frame_size = self.descriptor.frame_size))]
    fn read_frame(&self) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; self.frame_size()];
        let n = match self.read_mode {
            ReadMode::Blocking => self
                .device
                .read(&mut buf)
                .map_err(|e| TransportError::ReadFailed(e.to_string()))?,
            ReadMode::NonBlocking { timeout_ms } => read_with_deadline(
                |wait_ms| {
                    self.device
                        .read_timeout(&mut buf, wait_ms)
                        .map_err(|e| TransportError::ReadFailed(e.to_string()))
                },
                timeout_ms,
            )?,
        };

        buf.truncate(n);
        debug!(bytes_read = n, "Read complete");
        Ok(buf)
    }

    fn device(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn set_frame_size(&mut self, frame_size: usize) {
        debug!(from = self.descriptor.frame_size, to = frame_size, "Frame size changed");
        self.descriptor.set_frame_size(frame_size);
    }
}

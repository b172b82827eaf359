//! HID report size negotiation for dual-configuration tools.
//!
//! Some 3G tools can run with either 64-byte or 512-byte HID reports and the
//! choice is not advertised in a USB-standard way. On hosts where descriptors
//! are readable before opening, the endpoint size is read from the active
//! configuration (passive). Elsewhere the tool is asked over CMSIS-DAP after
//! opening at the default size (active).

use byteorder::{ByteOrder, LittleEndian};
use nusb::{MaybeFuture, list_devices};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::device::DeviceDescriptor;
use crate::error::{ChannelError, ProtocolError};
use crate::protocol::constants::{
    DAP_ID_PACKET_SIZE, DAP_INFO_PACKET_SIZE_OFFSET, ID_DAP_INFO, USB_CLASS_HID, VALID_FRAME_SIZES,
};
use crate::toolinfo::is_dual_configuration;
use crate::transport::FrameTransport;

#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("USB descriptor access failed: {0}")]
    DescriptorAccess(String),
}

/// How the frame size of a dual-configuration tool is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStrategy {
    /// Read the HID endpoint size from USB descriptors before opening.
    Passive,
    /// Query the tool with `DAP_Info` after opening.
    Active,
}

impl NegotiationStrategy {
    /// Windows cannot inspect descriptors of HID-claimed devices.
    pub fn for_host() -> Self {
        if cfg!(windows) {
            NegotiationStrategy::Active
        } else {
            NegotiationStrategy::Passive
        }
    }
}

/// Read access to USB descriptors.
pub trait DescriptorSource {
    /// Max packet size of the first endpoint on the first HID interface of the
    /// device's active configuration, `None` when no such device is attached.
    fn hid_max_packet_size(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial_number: &str,
    ) -> Result<Option<usize>, NegotiationError>;
}

/// Descriptor source backed by nusb.
pub struct NusbDescriptorSource;

impl DescriptorSource for NusbDescriptorSource {
    fn hid_max_packet_size(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial_number: &str,
    ) -> Result<Option<usize>, NegotiationError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| NegotiationError::DescriptorAccess(e.to_string()))?;

        for device_info in devices {
            if device_info.vendor_id() != vendor_id
                || device_info.product_id() != product_id
                || device_info.serial_number().unwrap_or_default() != serial_number
            {
                continue;
            }

            let device = device_info
                .open()
                .wait()
                .map_err(|e| NegotiationError::DescriptorAccess(e.to_string()))?;
            let config = device
                .active_configuration()
                .map_err(|e| NegotiationError::DescriptorAccess(e.to_string()))?;

            for iface in config.interfaces() {
                for alt in iface.alt_settings() {
                    if alt.class() != USB_CLASS_HID {
                        continue;
                    }
                    // Both HID endpoints share one size
                    if let Some(ep) = alt.endpoints().next() {
                        let size = usize::from(ep.max_packet_size());
                        debug!(size, "Packet size detected");
                        return Ok(Some(size));
                    }
                }
            }
        }
        Ok(None)
    }
}

/// Passive detection. `None` means "undetermined, keep the default".
pub fn detect_frame_size(
    source: &dyn DescriptorSource,
    device: &DeviceDescriptor,
) -> Result<Option<usize>, NegotiationError> {
    if !is_dual_configuration(device.product_id) {
        return Ok(None);
    }
    debug!("Atmel/Microchip 3G tool: checking for endpoint size configuration");
    let size = source.hid_max_packet_size(
        device.vendor_id,
        device.product_id,
        &device.serial_number,
    )?;
    Ok(size.filter(|&s| s > 0))
}

/// Active detection on an opened transport. Returns the frame size in use.
///
/// Any failure or implausible answer keeps the current size and logs a warning.
pub fn adjust_frame_size<T: FrameTransport + ?Sized>(transport: &mut T) -> usize {
    let current = transport.frame_size();
    if !is_dual_configuration(transport.device().product_id) {
        return current;
    }
    debug!("Atmel/Microchip 3G tool: actively querying device for endpoint size configuration");

    match query_packet_size(transport) {
        Ok(size) if VALID_FRAME_SIZES.contains(&size) => {
            transport.set_frame_size(size);
            debug!(size, "Using detected report size");
            size
        }
        Ok(size) => {
            warn!(size, current, "Unexpected report size reported, keeping default");
            current
        }
        Err(e) => {
            warn!(error = %e, current, "Report size detection failed, keeping default");
            current
        }
    }
}

fn query_packet_size<T: FrameTransport + ?Sized>(transport: &T) -> Result<usize, ChannelError> {
    let sent = transport.write_frame(&[ID_DAP_INFO, DAP_ID_PACKET_SIZE])?;
    debug!(sent, frame_size = transport.frame_size(), "HID write for size query");
    let reply = transport.read_frame()?;
    let bytes = reply
        .get(DAP_INFO_PACKET_SIZE_OFFSET..DAP_INFO_PACKET_SIZE_OFFSET + 2)
        .ok_or(ProtocolError::ShortFrame {
            expected: DAP_INFO_PACKET_SIZE_OFFSET + 2,
            actual: reply.len(),
        })?;
    Ok(LittleEndian::read_u16(bytes) as usize)
}

/// Runs the host-appropriate negotiation around opening a device.
pub struct FrameSizeNegotiator {
    strategy: NegotiationStrategy,
    source: Box<dyn DescriptorSource>,
}

impl FrameSizeNegotiator {
    pub fn new(strategy: NegotiationStrategy) -> Self {
        Self::with_source(strategy, Box::new(NusbDescriptorSource))
    }

    pub fn with_source(strategy: NegotiationStrategy, source: Box<dyn DescriptorSource>) -> Self {
        Self { strategy, source }
    }

    pub fn strategy(&self) -> NegotiationStrategy {
        self.strategy
    }

    /// Passive step, run on the descriptor before opening.
    pub fn before_open(&self, device: &mut DeviceDescriptor) {
        if self.strategy != NegotiationStrategy::Passive {
            return;
        }
        match detect_frame_size(self.source.as_ref(), device) {
            Ok(Some(size)) => {
                info!(size, "Frame size from USB descriptor");
                device.set_frame_size(size);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Endpoint size detection failed, keeping default"),
        }
    }

    /// Active step, run on the open transport before any exchange.
    pub fn after_open<T: FrameTransport + ?Sized>(&self, transport: &mut T) -> usize {
        if self.strategy != NegotiationStrategy::Active {
            return transport.frame_size();
        }
        adjust_frame_size(transport)
    }
}

impl Default for FrameSizeNegotiator {
    fn default() -> Self {
        Self::new(NegotiationStrategy::for_host())
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::protocol::constants::{
        USB_TOOL_DEVICE_PRODUCT_ID_ATMELICE, USB_TOOL_DEVICE_PRODUCT_ID_NEDBG_HID_MSD_DGI_CDC,
        USB_VID_ATMEL,
    };
    use crate::transport::MockTransport;

    /// In-memory descriptor table keyed by VID, PID and serial number.
    struct StaticSource {
        entries: Vec<(u16, u16, &'static str, usize)>,
        fail: bool,
    }

    impl DescriptorSource for StaticSource {
        fn hid_max_packet_size(
            &self,
            vendor_id: u16,
            product_id: u16,
            serial_number: &str,
        ) -> Result<Option<usize>, NegotiationError> {
            if self.fail {
                return Err(NegotiationError::DescriptorAccess("permission denied".into()));
            }
            Ok(self
                .entries
                .iter()
                .find(|(v, p, s, _)| *v == vendor_id && *p == product_id && *s == serial_number)
                .map(|e| e.3))
        }
    }

    fn atmel_ice(serial: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(
            USB_VID_ATMEL,
            USB_TOOL_DEVICE_PRODUCT_ID_ATMELICE,
            serial,
            "Atmel-ICE CMSIS-DAP",
            "Atmel Corp.",
        )
    }

    fn source(fail: bool) -> StaticSource {
        StaticSource {
            entries: vec![(USB_VID_ATMEL, USB_TOOL_DEVICE_PRODUCT_ID_ATMELICE, "J41800001234", 512)],
            fail,
        }
    }

    #[test]
    fn test_passive_detection() {
        let device = atmel_ice("J41800001234");
        assert_eq!(detect_frame_size(&source(false), &device).unwrap(), Some(512));

        // Serial numbers must match exactly
        let other = atmel_ice("J41800009999");
        assert_eq!(detect_frame_size(&source(false), &other).unwrap(), None);
    }

    #[test]
    fn test_passive_skips_single_config_tools() {
        let device = DeviceDescriptor::new(
            USB_VID_ATMEL,
            USB_TOOL_DEVICE_PRODUCT_ID_NEDBG_HID_MSD_DGI_CDC,
            "MCHP3290000001",
            "nEDBG CMSIS-DAP",
            "Microchip",
        );
        // A failing source is never consulted
        assert_eq!(detect_frame_size(&source(true), &device).unwrap(), None);
    }

    #[test]
    #[traced_test]
    fn test_passive_failure_keeps_default() {
        let mut device = atmel_ice("J41800001234");
        assert!(detect_frame_size(&source(true), &device).is_err());

        let negotiator =
            FrameSizeNegotiator::with_source(NegotiationStrategy::Passive, Box::new(source(true)));
        negotiator.before_open(&mut device);
        assert_eq!(device.frame_size, 64);
        assert!(logs_contain("Endpoint size detection failed, keeping default"));

        let negotiator =
            FrameSizeNegotiator::with_source(NegotiationStrategy::Passive, Box::new(source(false)));
        negotiator.before_open(&mut device);
        assert_eq!(device.frame_size, 512);
    }

    #[test]
    fn test_active_query_accepts_high_speed() {
        let mut mock = MockTransport::with_device(atmel_ice("J41800001234"));
        mock.queue_response(&[0x00, 0x02, 0x00, 0x02]);

        assert_eq!(adjust_frame_size(&mut mock), 512);
        assert_eq!(mock.frame_size(), 512);
        assert_eq!(&mock.get_writes()[0][..2], &[0x00, 0xFF]);
    }

    #[test]
    #[traced_test]
    fn test_active_query_rejects_odd_size() {
        let mut mock = MockTransport::with_device(atmel_ice("J41800001234"));
        mock.queue_response(&[0x00, 0x02, 0x80, 0x00]);

        assert_eq!(adjust_frame_size(&mut mock), 64);
        assert_eq!(mock.frame_size(), 64);
        assert!(logs_contain("Unexpected report size reported, keeping default"));
    }

    #[test]
    #[traced_test]
    fn test_active_query_transport_error() {
        let mut mock = MockTransport::with_device(atmel_ice("J41800001234"));
        mock.disconnect();
        assert_eq!(adjust_frame_size(&mut mock), 64);
        assert!(logs_contain("Report size detection failed, keeping default"));
    }

    #[test]
    fn test_active_query_skips_single_config_tools() {
        let mut mock = MockTransport::new();
        mock.queue_response(&[0x00, 0x02, 0x00, 0x02]);
        assert_eq!(adjust_frame_size(&mut mock), 64);
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_strategy_gates_steps() {
        let negotiator =
            FrameSizeNegotiator::with_source(NegotiationStrategy::Active, Box::new(source(false)));
        let mut device = atmel_ice("J41800001234");
        negotiator.before_open(&mut device);
        assert_eq!(device.frame_size, 64);

        let mut mock = MockTransport::with_device(device);
        mock.queue_response(&[0x00, 0x02, 0x00, 0x02]);
        assert_eq!(negotiator.after_open(&mut mock), 512);
    }

    #[test]
    fn test_strategy_serde() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            strategy: NegotiationStrategy,
        }
        let parsed: Wrapper = toml::from_str("strategy = \"active\"").unwrap();
        assert_eq!(parsed.strategy, NegotiationStrategy::Active);
    }
}

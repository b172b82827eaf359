//! Device discovery.
//!
//! Enumeration produces a [`DeviceRegistry`] value that is handed by ownership
//! to whoever opens a device. There is no process-wide device list.

use tracing::{debug, error};

use crate::protocol::constants::{DEFAULT_FRAME_SIZE, PRODUCT_SUBSTRING, VID_LIST};
use crate::toolinfo::tool_shortname_to_product_string;
use crate::transport::TransportError;

/// One physical CMSIS-DAP probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: String,
    pub product_string: String,
    pub manufacturer_string: String,
    /// HID report size in use; the only field changed after discovery.
    pub frame_size: usize,
}

impl DeviceDescriptor {
    pub fn new(
        vendor_id: u16,
        product_id: u16,
        serial_number: impl Into<String>,
        product_string: impl Into<String>,
        manufacturer_string: impl Into<String>,
    ) -> Self {
        Self {
            vendor_id,
            product_id,
            serial_number: serial_number.into(),
            product_string: product_string.into(),
            manufacturer_string: manufacturer_string.into(),
            frame_size: DEFAULT_FRAME_SIZE,
        }
    }

    pub fn set_frame_size(&mut self, frame_size: usize) {
        self.frame_size = frame_size;
    }

    /// Check for the blank-strings symptom of a missing udev rule.
    ///
    /// Without the rule VID and PID are readable but every string descriptor
    /// comes back empty and the device cannot be opened.
    pub fn missing_udev_rule(&self) -> bool {
        self.serial_number.is_empty()
            && self.manufacturer_string.is_empty()
            && self.product_string.is_empty()
    }

    /// udev rule granting access to this device.
    pub fn udev_rule(&self) -> String {
        format!(
            "SUBSYSTEM==\"usb\",ATTRS{{idVendor}}==\"{:04X}\",ATTRS{{idProduct}}==\"{:04X}\",MODE=\"0666\"",
            self.vendor_id, self.product_id
        )
    }

    /// Log a hint on Linux when the device looks inaccessible.
    pub fn linux_udev_rule_check(&self) {
        if cfg!(target_os = "linux") && self.missing_udev_rule() {
            error!(
                rule = %self.udev_rule(),
                "Device not recognised - check that a udev rule exists for this device"
            );
        }
    }
}

/// Raw HID enumeration record, as reported by the HID library.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HidRecord {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: String,
    pub product_string: String,
    pub manufacturer_string: String,
}

impl From<&hidapi::DeviceInfo> for HidRecord {
    fn from(info: &hidapi::DeviceInfo) -> Self {
        Self {
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            serial_number: info.serial_number().unwrap_or_default().to_string(),
            product_string: info.product_string().unwrap_or_default().to_string(),
            manufacturer_string: info.manufacturer_string().unwrap_or_default().to_string(),
        }
    }
}

/// Result of one enumeration pass.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceRegistry {
    /// Enumerate connected CMSIS-DAP tools through hidapi.
    pub fn enumerate() -> Result<Self, TransportError> {
        debug!("Detecting Atmel/Microchip CMSIS-DAP compliant devices on USB");
        let api = hidapi::HidApi::new().map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        Ok(Self::from_records(api.device_list().map(HidRecord::from)))
    }

    /// Build a registry by filtering raw enumeration records.
    ///
    /// Keeps records whose vendor ID is known and whose product string
    /// contains `CMSIS-DAP` (case-sensitive). Every kept device starts at the
    /// default frame size.
    pub fn from_records(records: impl IntoIterator<Item = HidRecord>) -> Self {
        let devices = records
            .into_iter()
            .filter(|r| {
                VID_LIST.contains(&r.vendor_id) && r.product_string.contains(PRODUCT_SUBSTRING)
            })
            .map(|r| {
                debug!(
                    vid = %format!("{:04X}", r.vendor_id),
                    pid = %format!("{:04X}", r.product_id),
                    product = %r.product_string,
                    serial = %r.serial_number,
                    manufacturer = %r.manufacturer_string,
                    "Detected device"
                );
                let device = DeviceDescriptor::new(
                    r.vendor_id,
                    r.product_id,
                    r.serial_number,
                    r.product_string,
                    r.manufacturer_string,
                );
                // Blank-string devices never pass the product filter, so this
                // almost never fires here. HidApiTransport::open repeats it on failure.
                device.linux_udev_rule_check();
                device
            })
            .collect();
        Self { devices }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.iter()
    }

    /// Take exactly one device matching the optional serial number and product.
    ///
    /// `product` may be a tool short name (`atmelice`) or any substring of the
    /// product string. A serial number must match exactly.
    pub fn select(
        self,
        serial_number: Option<&str>,
        product: Option<&str>,
    ) -> Result<DeviceDescriptor, TransportError> {
        let product = product.map(tool_shortname_to_product_string);
        let mut matches: Vec<DeviceDescriptor> = self
            .devices
            .into_iter()
            .filter(|d| serial_number.is_none_or(|s| d.serial_number == s))
            .filter(|d| product.is_none_or(|p| d.product_string.contains(p)))
            .collect();

        match matches.len() {
            0 => Err(TransportError::NoMatchingDevice {
                serial_number: serial_number.map(str::to_string),
                product: product.map(str::to_string),
            }),
            1 => Ok(matches.remove(0)),
            n => Err(TransportError::MultipleDevices(n)),
        }
    }
}

impl IntoIterator for DeviceRegistry {
    type Item = DeviceDescriptor;
    type IntoIter = std::vec::IntoIter<DeviceDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_iter()
    }
}

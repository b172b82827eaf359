//! Known Atmel/Microchip CMSIS-DAP tools and their default report sizes.

use tracing::debug;

use crate::protocol::constants::*;

/// Known tool, keyed by product ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolInfo {
    pub product_id: u16,
    pub default_report_size: usize,
}

/// Default report sizes for known PIDs (3G: 512, 4G/5G: 64).
pub const HID_TOOLS: &[ToolInfo] = &[
    // 3G
    ToolInfo {
        product_id: USB_TOOL_DEVICE_PRODUCT_ID_JTAGICE3,
        default_report_size: FRAME_SIZE_HIGH_SPEED,
    },
    ToolInfo {
        product_id: USB_TOOL_DEVICE_PRODUCT_ID_ATMELICE,
        default_report_size: FRAME_SIZE_HIGH_SPEED,
    },
    ToolInfo {
        product_id: USB_TOOL_DEVICE_PRODUCT_ID_POWERDEBUGGER,
        default_report_size: FRAME_SIZE_HIGH_SPEED,
    },
    ToolInfo {
        product_id: USB_TOOL_DEVICE_PRODUCT_ID_EDBG_A,
        default_report_size: FRAME_SIZE_HIGH_SPEED,
    },
    ToolInfo {
        product_id: USB_TOOL_DEVICE_PRODUCT_ID_MSD,
        default_report_size: FRAME_SIZE_HIGH_SPEED,
    },
    // 4G
    ToolInfo {
        product_id: USB_TOOL_DEVICE_PRODUCT_ID_MEDBG,
        default_report_size: FRAME_SIZE_FULL_SPEED,
    },
    // 5G
    ToolInfo {
        product_id: USB_TOOL_DEVICE_PRODUCT_ID_NEDBG_HID_MSD_DGI_CDC,
        default_report_size: FRAME_SIZE_FULL_SPEED,
    },
    ToolInfo {
        product_id: USB_TOOL_DEVICE_PRODUCT_ID_PICKIT4_HID_CDC,
        default_report_size: FRAME_SIZE_FULL_SPEED,
    },
    ToolInfo {
        product_id: USB_TOOL_DEVICE_PRODUCT_ID_SNAP_HID_CDC,
        default_report_size: FRAME_SIZE_FULL_SPEED,
    },
    ToolInfo {
        product_id: USB_TOOL_DEVICE_PRODUCT_ID_ICD4_HID_CDC,
        default_report_size: FRAME_SIZE_FULL_SPEED,
    },
    ToolInfo {
        product_id: USB_TOOL_DEVICE_PRODUCT_ID_ICE4_HID_CDC,
        default_report_size: FRAME_SIZE_FULL_SPEED,
    },
];

/// Short tool names mapped to the substring found in their USB product string.
pub const TOOL_SHORTNAME_TO_USB_PRODUCT_STRING: &[(&str, &str)] = &[
    ("atmelice", "Atmel-ICE"),
    ("powerdebugger", "Power Debugger"),
    ("pickit4", "MPLAB PICkit 4"),
    ("snap", "MPLAB Snap"),
    ("nedbg", "nEDBG"),
    ("jtagice3", "JTAGICE3"),
    ("medbg", "mEDBG"),
    ("edbg", "EDBG"),
    ("icd4", "MPLAB ICD 4"),
    ("ice4", "MPLAB ICE 4"),
];

/// Default report size for a product ID, falling back to 64 for unknown tools.
pub fn default_report_size(product_id: u16) -> usize {
    debug!(pid = %format!("0x{:04X}", product_id), "Looking up report size");
    match HID_TOOLS.iter().find(|t| t.product_id == product_id) {
        Some(tool) => {
            debug!(size = tool.default_report_size, "Default report size");
            tool.default_report_size
        }
        None => {
            debug!("PID not found, reverting to 64b");
            DEFAULT_FRAME_SIZE
        }
    }
}

/// Whether a tool has the dual 64/512 HID configuration.
pub fn is_dual_configuration(product_id: u16) -> bool {
    DUAL_CONFIGURATION_3G_TOOLS.contains(&product_id)
}

/// Map a tool short name (e.g. `atmelice`) to its product string.
///
/// Lookup is case-insensitive. Names that are not known short names are
/// returned unchanged, since they may already be product strings.
pub fn tool_shortname_to_product_string(shortname: &str) -> &str {
    let lower = shortname.to_lowercase();
    match TOOL_SHORTNAME_TO_USB_PRODUCT_STRING
        .iter()
        .find(|(short, _)| *short == lower)
    {
        Some((_, product)) => product,
        None => {
            debug!(name = %shortname, "Not a known tool shortname");
            shortname
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_report_size() {
        assert_eq!(default_report_size(USB_TOOL_DEVICE_PRODUCT_ID_ATMELICE), 512);
        assert_eq!(default_report_size(USB_TOOL_DEVICE_PRODUCT_ID_NEDBG_HID_MSD_DGI_CDC), 64);
        assert_eq!(default_report_size(0xFFFF), 64);
    }

    #[test]
    fn test_dual_configuration() {
        assert!(is_dual_configuration(USB_TOOL_DEVICE_PRODUCT_ID_POWERDEBUGGER));
        assert!(!is_dual_configuration(USB_TOOL_DEVICE_PRODUCT_ID_JTAGICE3));
        assert!(!is_dual_configuration(USB_TOOL_DEVICE_PRODUCT_ID_PICKIT4_HID_CDC));
    }

    #[test]
    fn test_shortname_lookup() {
        assert_eq!(tool_shortname_to_product_string("AtmelICE"), "Atmel-ICE");
        assert_eq!(tool_shortname_to_product_string("nedbg"), "nEDBG");
        assert_eq!(tool_shortname_to_product_string("Curiosity"), "Curiosity");
    }
}

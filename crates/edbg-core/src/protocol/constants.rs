//! Protocol constants for Atmel/Microchip CMSIS-DAP tools.
//!
//! Covers USB identification, HID framing, the CMSIS-DAP `DAP_Info`
//! subset used for size probing, and the AVR vendor command layer.

// ============================================================================
// Device Identification
// ============================================================================

/// Atmel Corporation Vendor ID (used by all EDBG-based tools)
pub const USB_VID_ATMEL: u16 = 0x03EB;

/// Vendor IDs accepted during discovery
pub const VID_LIST: &[u16] = &[USB_VID_ATMEL];

/// Case-sensitive substring every supported product string carries
pub const PRODUCT_SUBSTRING: &str = "CMSIS-DAP";

// 3G tools
pub const USB_TOOL_DEVICE_PRODUCT_ID_JTAGICE3: u16 = 0x2140;
pub const USB_TOOL_DEVICE_PRODUCT_ID_ATMELICE: u16 = 0x2141;
pub const USB_TOOL_DEVICE_PRODUCT_ID_POWERDEBUGGER: u16 = 0x2144;
pub const USB_TOOL_DEVICE_PRODUCT_ID_EDBG_A: u16 = 0x2111;
pub const USB_TOOL_DEVICE_PRODUCT_ID_MSD: u16 = 0x2169;
pub const USB_TOOL_DEVICE_PRODUCT_ID_ZERO: u16 = 0x2157;
pub const USB_TOOL_DEVICE_PRODUCT_ID_PUBLIC_EDBG_C: u16 = 0x216A;

// 4G tools
pub const USB_TOOL_DEVICE_PRODUCT_ID_MEDBG: u16 = 0x2145;

// 5G tools
pub const USB_TOOL_DEVICE_PRODUCT_ID_NEDBG_HID_MSD_DGI_CDC: u16 = 0x2175;
pub const USB_TOOL_DEVICE_PRODUCT_ID_PICKIT4_HID_CDC: u16 = 0x2177;
pub const USB_TOOL_DEVICE_PRODUCT_ID_SNAP_HID_CDC: u16 = 0x2180;
pub const USB_TOOL_DEVICE_PRODUCT_ID_ICD4_HID_CDC: u16 = 0x217C;
pub const USB_TOOL_DEVICE_PRODUCT_ID_ICE4_HID_CDC: u16 = 0x2193;

/// Tools with non-standard 'dual configuration' HID interfaces.
///
/// The default configuration uses 512-byte reports, the 'strict' and
/// 'minimal' configurations use 64-byte reports. Switching is persistent in
/// the tool and not done in a USB-standard way.
pub const DUAL_CONFIGURATION_3G_TOOLS: &[u16] = &[
    USB_TOOL_DEVICE_PRODUCT_ID_ATMELICE,
    USB_TOOL_DEVICE_PRODUCT_ID_POWERDEBUGGER,
    USB_TOOL_DEVICE_PRODUCT_ID_EDBG_A,
    USB_TOOL_DEVICE_PRODUCT_ID_MSD,
    USB_TOOL_DEVICE_PRODUCT_ID_ZERO,
    USB_TOOL_DEVICE_PRODUCT_ID_PUBLIC_EDBG_C,
];

/// USB interface class code for HID
pub const USB_CLASS_HID: u8 = 0x03;

// ============================================================================
// HID Framing
// ============================================================================

/// Frame size assumed until negotiation proves otherwise
pub const DEFAULT_FRAME_SIZE: usize = 64;

/// Full-speed HID report size
pub const FRAME_SIZE_FULL_SPEED: usize = 64;

/// High-speed HID report size
pub const FRAME_SIZE_HIGH_SPEED: usize = 512;

/// Report sizes a tool may legitimately report when probed
pub const VALID_FRAME_SIZES: &[usize] = &[FRAME_SIZE_FULL_SPEED, FRAME_SIZE_HIGH_SPEED];

/// Report ID prepended to every outgoing frame (not part of the payload)
pub const HID_REPORT_ID: u8 = 0x00;

// ============================================================================
// CMSIS-DAP
// ============================================================================

/// `DAP_Info` command ID
pub const ID_DAP_INFO: u8 = 0x00;

pub const DAP_ID_VENDOR: u8 = 0x01;
pub const DAP_ID_PRODUCT: u8 = 0x02;
pub const DAP_ID_SER_NUM: u8 = 0x03;
pub const DAP_ID_FW_VER: u8 = 0x04;
pub const DAP_ID_PACKET_COUNT: u8 = 0xFE;
pub const DAP_ID_PACKET_SIZE: u8 = 0xFF;

/// Offset of the little-endian packet size in a `DAP_Info` reply
pub const DAP_INFO_PACKET_SIZE_OFFSET: usize = 2;

// ============================================================================
// AVR Vendor Commands (tunnelled over CMSIS-DAP)
// ============================================================================

/// Command fragment tag (Host -> Device)
pub const AVR_COMMAND: u8 = 0x80;
/// Response poll tag
pub const AVR_RESPONSE: u8 = 0x81;
/// Event poll tag
pub const AVR_EVENT: u8 = 0x82;

/// Fragment ack: device expects more fragments / response still busy
pub const AVR_MORE_FRAGMENTS: u8 = 0x00;
/// Fragment ack: final fragment accepted
pub const AVR_FINAL_FRAGMENT: u8 = 0x01;

// Command fragment layout
pub const AVR_CMD_COMMAND_HEADER_CMD: usize = 0;
pub const AVR_CMD_COMMAND_HEADER_FRAGMENT_NUMBER: usize = 1;
pub const AVR_CMD_COMMAND_HEADER_SIZE: usize = 2;
pub const AVR_CMD_COMMAND_HEADER_PAYLOAD_START: usize = 4;

// Command acknowledgement layout
pub const AVR_CMD_RESPONSE_HEADER_CMD: usize = 0;
pub const AVR_CMD_RESPONSE_FRAGMENT_CODE: usize = 1;

// Response fragment layout
pub const AVR_RSP_RESPONSE_HEADER_RSP: usize = 0;
pub const AVR_RSP_RESPONSE_HEADER_FRAGMENT_NUMBER: usize = 1;
pub const AVR_RSP_RESPONSE_HEADER_SIZE: usize = 2;
pub const AVR_RSP_RESPONSE_HEADER_PAYLOAD_START: usize = 4;

// Event layout
pub const AVR_EVENT_RESPONSE_HEADER_EVT: usize = 0;
pub const AVR_EVENT_RESPONSE_HEADER_SIZE: usize = 1;
pub const AVR_EVENT_RESPONSE_HEADER_PAYLOAD_START: usize = 3;

/// Events are in practice between 8 and 14 bytes
pub const AVR_EVENT_RESPONSE_MIN_SIZE: usize = 6;
pub const AVR_EVENT_RESPONSE_MAX_SIZE: usize =
    FRAME_SIZE_FULL_SPEED - AVR_EVENT_RESPONSE_HEADER_PAYLOAD_START;

/// Fragment index and count share one byte, one nibble each
pub const AVR_MAX_FRAGMENTS: usize = 15;

// ============================================================================
// Timing
// ============================================================================

/// Default response timeout
pub const AVR_DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Delay between response polls
pub const AVR_RETRY_DELAY_MS: u64 = 50;

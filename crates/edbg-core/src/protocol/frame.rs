//! HID frame padding.

use super::constants::HID_REPORT_ID;

/// Build an outgoing HID report from a logical payload.
///
/// The payload is zero-padded to `frame_size` and prefixed with the report ID
/// byte, so the result is always `frame_size + 1` bytes long. Payloads longer
/// than `frame_size` are the caller's responsibility and are rejected by the
/// transport before this is called.
pub fn pad_frame(data: &[u8], frame_size: usize) -> Vec<u8> {
    let mut report = Vec::with_capacity(frame_size + 1);
    report.push(HID_REPORT_ID);
    report.extend_from_slice(data);
    report.resize(frame_size + 1, 0x00);
    report
}

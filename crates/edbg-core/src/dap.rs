//! CMSIS-DAP `DAP_Info` queries.
//!
//! Replies have the shape `[0x00, len, data...]`. String answers may carry a
//! trailing NUL, numeric answers are little-endian.

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use crate::error::{ChannelError, ProtocolError};
use crate::protocol::constants::*;
use crate::transport::FrameTransport;

const DAP_INFO_LEN_OFFSET: usize = 1;
const DAP_INFO_DATA_OFFSET: usize = 2;

/// Identity strings and packet limits reported by a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolIdentity {
    pub vendor: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub packet_size: u16,
    pub packet_count: u8,
}

/// Send `DAP_Info` for `id` and return the answer bytes.
pub fn dap_info<T: FrameTransport + ?Sized>(transport: &T, id: u8) -> Result<Vec<u8>, ChannelError> {
    let reply = transport.transfer(&[ID_DAP_INFO, id])?;
    let command = *reply.first().ok_or(ProtocolError::ShortFrame {
        expected: DAP_INFO_DATA_OFFSET,
        actual: 0,
    })?;
    if command != ID_DAP_INFO {
        return Err(ProtocolError::InvalidDapResponse {
            expected: ID_DAP_INFO,
            actual: command,
        }
        .into());
    }

    let len = reply
        .get(DAP_INFO_LEN_OFFSET)
        .copied()
        .ok_or(ProtocolError::ShortFrame {
            expected: DAP_INFO_DATA_OFFSET,
            actual: reply.len(),
        })? as usize;
    let data = reply
        .get(DAP_INFO_DATA_OFFSET..DAP_INFO_DATA_OFFSET + len)
        .ok_or(ProtocolError::ShortFrame {
            expected: DAP_INFO_DATA_OFFSET + len,
            actual: reply.len(),
        })?;

    debug!(id = %format!("0x{:02X}", id), len, "DAP_Info reply");
    Ok(data.to_vec())
}

/// Query a string-valued `DAP_Info` item. An empty answer is `None`.
pub fn dap_info_string<T: FrameTransport + ?Sized>(
    transport: &T,
    id: u8,
) -> Result<Option<String>, ChannelError> {
    let data = dap_info(transport, id)?;
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    if end == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&data[..end]).into_owned()))
}

/// Maximum packet size the probe firmware supports.
pub fn dap_packet_size<T: FrameTransport + ?Sized>(transport: &T) -> Result<u16, ChannelError> {
    let data = dap_info(transport, DAP_ID_PACKET_SIZE)?;
    if data.len() < 2 {
        return Err(ProtocolError::ShortFrame {
            expected: 2,
            actual: data.len(),
        }
        .into());
    }
    Ok(LittleEndian::read_u16(&data))
}

/// Number of packets the probe can buffer.
pub fn dap_packet_count<T: FrameTransport + ?Sized>(transport: &T) -> Result<u8, ChannelError> {
    let data = dap_info(transport, DAP_ID_PACKET_COUNT)?;
    data.first().copied().ok_or_else(|| {
        ProtocolError::ShortFrame {
            expected: 1,
            actual: 0,
        }
        .into()
    })
}

/// Collect every identity item in one pass.
pub fn query_identity<T: FrameTransport + ?Sized>(transport: &T) -> Result<ToolIdentity, ChannelError> {
    Ok(ToolIdentity {
        vendor: dap_info_string(transport, DAP_ID_VENDOR)?,
        product: dap_info_string(transport, DAP_ID_PRODUCT)?,
        serial_number: dap_info_string(transport, DAP_ID_SER_NUM)?,
        firmware_version: dap_info_string(transport, DAP_ID_FW_VER)?,
        packet_size: dap_packet_size(transport)?,
        packet_count: dap_packet_count(transport)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn info_reply(data: &[u8]) -> Vec<u8> {
        let mut reply = vec![ID_DAP_INFO, data.len() as u8];
        reply.extend_from_slice(data);
        reply
    }

    #[test]
    fn test_string_info() {
        let mock = MockTransport::new();
        mock.queue_response(&info_reply(b"Microchip\0"));

        let vendor = dap_info_string(&mock, DAP_ID_VENDOR).unwrap();
        assert_eq!(vendor.as_deref(), Some("Microchip"));
        assert_eq!(&mock.get_writes()[0][..2], &[ID_DAP_INFO, DAP_ID_VENDOR]);
    }

    #[test]
    fn test_empty_string_info() {
        let mock = MockTransport::new();
        mock.queue_response(&info_reply(&[]));
        assert_eq!(dap_info_string(&mock, DAP_ID_SER_NUM).unwrap(), None);
    }

    #[test]
    fn test_numeric_info() {
        let mock = MockTransport::new();
        mock.queue_response(&info_reply(&[0x00, 0x02]));
        mock.queue_response(&info_reply(&[0x01]));

        assert_eq!(dap_packet_size(&mock).unwrap(), 512);
        assert_eq!(dap_packet_count(&mock).unwrap(), 1);
    }

    #[test]
    fn test_wrong_command_echo() {
        let mock = MockTransport::new();
        mock.queue_response(&[0x80, 0x01]);
        assert!(matches!(
            dap_info(&mock, DAP_ID_FW_VER),
            Err(ChannelError::Protocol(ProtocolError::InvalidDapResponse {
                expected: 0x00,
                actual: 0x80
            }))
        ));
    }

    #[test]
    fn test_length_beyond_frame() {
        let mock = MockTransport::new();
        mock.queue_response(&[ID_DAP_INFO, 200]);
        assert!(matches!(
            dap_info(&mock, DAP_ID_PRODUCT),
            Err(ChannelError::Protocol(ProtocolError::ShortFrame { .. }))
        ));
    }

    #[test]
    fn test_query_identity() {
        let mock = MockTransport::new();
        mock.queue_response(&info_reply(b"Microchip"));
        mock.queue_response(&info_reply(b"nEDBG CMSIS-DAP"));
        mock.queue_response(&info_reply(b"MCHP3290000001"));
        mock.queue_response(&info_reply(b"1.10.0"));
        mock.queue_response(&info_reply(&[0x40, 0x00]));
        mock.queue_response(&info_reply(&[0x01]));

        let identity = query_identity(&mock).unwrap();
        assert_eq!(identity.product.as_deref(), Some("nEDBG CMSIS-DAP"));
        assert_eq!(identity.firmware_version.as_deref(), Some("1.10.0"));
        assert_eq!(identity.packet_size, 64);
        assert_eq!(identity.packet_count, 1);
    }
}

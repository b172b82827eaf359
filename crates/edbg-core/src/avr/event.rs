//! AVR event polling.

use tracing::debug;

use super::AvrCommandChannel;
use crate::error::ChannelError;
use crate::observer::ChannelEvent;
use crate::protocol::{AVR_EVENT, decode_event};
use crate::transport::FrameTransport;

impl<T: FrameTransport> AvrCommandChannel<T> {
    /// Poll the device once for a pending event.
    ///
    /// A malformed or out-of-range reply is "no event". Only transport
    /// failures are errors.
    pub fn poll_events(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        debug!("Polling AVR events");
        let frame = self.transfer("AVR_EVT", &[AVR_EVENT])?;
        let event = decode_event(&frame);
        if let Some(payload) = &event {
            self.observer.on_event(&ChannelEvent::DeviceEvent {
                length: payload.len(),
            });
        }
        Ok(event)
    }
}
